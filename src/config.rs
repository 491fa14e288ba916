//! 配置系统
//! 从环境变量加载客户端配置（API 地址、凭据存储、日志）

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API 基础地址，例如 "https://api.example.com/api"
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
    /// 登录端点
    pub login_path: String,
    /// 注册端点
    pub signup_path: String,
    /// 令牌刷新端点
    pub refresh_path: String,
    /// 登出端点
    pub logout_path: String,
    /// 当前用户信息端点
    pub current_user_path: String,
    /// 用户名查重端点（后接 /{username}）
    pub check_username_path: String,
    /// 服务端管理员校验端点（后接 /{username}）
    pub check_admin_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 凭据存储后端: file, memory
    pub backend: String,
    /// 文件存储路径（backend = file 时使用）
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("api.base_url", "http://localhost:8080/api")?
            .set_default("api.timeout_secs", 30)?
            .set_default("api.login_path", "/auth/login")?
            .set_default("api.signup_path", "/auth/signup")?
            .set_default("api.refresh_path", "/auth/refresh")?
            .set_default("api.logout_path", "/auth/logout")?
            .set_default("api.current_user_path", "/auth/me")?
            .set_default("api.check_username_path", "/auth/check-username")?
            .set_default("api.check_admin_path", "/auth/check-admin")?
            .set_default("storage.backend", "file")?
            .set_default("storage.path", ".portal-session.json")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "compact")?;

        // 从环境变量加载配置（前缀为 PORTAL_）
        settings = settings.add_source(
            Environment::with_prefix("PORTAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证 API 地址
        let base_url = url::Url::parse(&self.api.base_url).map_err(|e| {
            ConfigError::Message(format!("Invalid api.base_url {}: {}", self.api.base_url, e))
        })?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ConfigError::Message(format!(
                "api.base_url must use http or https, got: {}",
                base_url.scheme()
            )));
        }

        if self.api.timeout_secs == 0 || self.api.timeout_secs > 300 {
            return Err(ConfigError::Message(
                "api.timeout_secs must be between 1 and 300".to_string(),
            ));
        }

        // 验证存储后端
        match self.storage.backend.to_lowercase().as_str() {
            "memory" => {}
            "file" => {
                if self.storage.path.trim().is_empty() {
                    return Err(ConfigError::Message(
                        "storage.path is required for the file backend".to_string(),
                    ));
                }
            }
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid storage backend: {}. Must be one of: file, memory",
                    self.storage.backend
                )))
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }
}
