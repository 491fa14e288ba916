//! 门户会话命令行入口
//! 登录、登出、角色校验与带会话的 API 请求

use anyhow::Context;
use clap::{Parser, Subcommand};
use portal_session::{
    config::AppConfig,
    gate::GateDecision,
    models::{LoginCredentials, Role, SignupRequest},
    store::CredentialStore,
    telemetry,
    transport::{ApiRequest, ReqwestTransport},
    AuthEndpoints, EndReason, SessionController, SessionEvent, SessionEvents, SessionState,
};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "portal-session")]
#[command(version)]
#[command(about = "Log in to the course portal and make authenticated API calls", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        username: String,

        /// Password (prefer the environment variable)
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        remember_me: bool,
    },

    /// End the current session
    Logout,

    /// Show the cached user
    Whoami {
        /// Re-fetch the user from the server first
        #[arg(long)]
        refresh: bool,
    },

    /// Check whether the cached user may enter a view requiring ROLE
    Authorize { role: Role },

    /// GET an API path with the current session
    Get { path: String },

    /// Register a new account
    Signup {
        username: String,

        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        organization: String,

        #[arg(long, default_value = "GENERAL")]
        role: Role,

        #[arg(long)]
        phone: String,

        #[arg(long)]
        drone_experience: bool,

        /// Accept the terms of service
        #[arg(long)]
        agree_terms: bool,
    },

    /// Show the session state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 加载 .env 文件：.env.local > .env
    if let Ok(env) = std::env::var("PORTAL_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging);

    // 3. 构建会话控制器（先订阅事件，恢复阶段的清理也能收到）
    let events = SessionEvents::default();
    let mut ended = events.subscribe();
    let transport = Arc::new(ReqwestTransport::new(&config.api)?);
    let store = Arc::new(CredentialStore::from_config(&config.storage)?);
    let controller = SessionController::with_events(
        transport,
        store,
        AuthEndpoints::from(&config.api),
        events,
    );

    let result = run(&controller, cli.command).await;
    report_session_end(&mut ended);

    if let Err(e) = result {
        tracing::debug!(error = %e, kind = ?e.kind(), "Command failed");
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(controller: &SessionController, command: Commands) -> portal_session::Result<()> {
    match command {
        Commands::Login {
            username,
            password,
            remember_me,
        } => {
            let mut credentials = LoginCredentials::new(&username, &password);
            credentials.remember_me = remember_me;
            let user = controller.login(&credentials).await?;
            println!("Logged in as {} ({})", user.username, user.role);
        }
        Commands::Logout => {
            controller.logout().await;
            println!("Logged out");
        }
        Commands::Whoami { refresh } => {
            let user = if refresh {
                Some(controller.current_user().await?)
            } else {
                controller.user()
            };
            match user {
                Some(user) => print_json(&user),
                None => println!("Not logged in"),
            }
        }
        Commands::Authorize { role } => match controller.gate().authorize(role) {
            GateDecision::Admit(user) => println!("Admitted: {} ({})", user.username, user.role),
            GateDecision::Deny(reason) => {
                println!("Denied: {}", reason.message());
                std::process::exit(2);
            }
        },
        Commands::Get { path } => {
            let response = controller.send(ApiRequest::get(path)).await?;
            match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(body) => print_json(&body),
                Err(_) => println!("{}", response.body),
            }
        }
        Commands::Signup {
            username,
            password,
            email,
            organization,
            role,
            phone,
            drone_experience,
            agree_terms,
        } => {
            let request = SignupRequest {
                username,
                confirm_password: password.clone(),
                password,
                email,
                organization,
                role,
                phone,
                drone_experience,
                terms_agreed: agree_terms,
            };
            let receipt = controller.signup(request).await?;
            println!("Registered {} (id {})", receipt.username, receipt.user_id);
        }
        Commands::Status => {
            let state = match controller.state() {
                SessionState::LoggedOut => "logged out",
                SessionState::Active => "active",
                SessionState::Renewing => "renewing",
            };
            match controller.user() {
                Some(user) => println!("Session {} for {} ({})", state, user.username, user.role),
                None => println!("Session {}", state),
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render output: {}", e),
    }
}

/// 会话被动结束时提示用户重新登录
fn report_session_end(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Ended { reason, .. } if reason != EndReason::Logout => {
                eprintln!("{}", reason.message());
            }
            _ => {}
        }
    }
}
