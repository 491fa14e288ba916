//! 会话生命周期控制器
//!
//! 负责状态转换 `LoggedOut -> Active -> (Renewing) -> Active | LoggedOut`。
//! 没有定时器：请求被拒时才发现过期，续期发生在请求管线内。

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::{ApiConfig, AppConfig};
use crate::dispatcher::RequestDispatcher;
use crate::error::{Result, SessionError};
use crate::events::{EndReason, SessionEvent, SessionEvents};
use crate::gate::AuthorizationGate;
use crate::models::auth::{validation_messages, AdminCheck, UsernameCheck, USERNAME_PATTERN};
use crate::models::{
    Credential, LoginCredentials, LoginPayload, SessionUser, SignupReceipt, SignupRequest,
};
use crate::pipeline::{RenewOnExpiry, RequestHandler};
use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;
use crate::transport::{ApiRequest, HttpTransport, RawResponse, ReqwestTransport};

/// 清空存储，若确有数据被移除则宣布会话结束。返回是否存在（部分）会话
pub(crate) fn end_session(
    store: &CredentialStore,
    events: &SessionEvents,
    reason: EndReason,
) -> bool {
    let removed = store.clear_all();
    if removed {
        announce_end(events, reason);
    }
    removed
}

pub(crate) fn announce_end(events: &SessionEvents, reason: EndReason) {
    metrics::counter!("session_logout_total", "reason" => reason.as_str()).increment(1);
    info!(reason = reason.as_str(), "Session ended");
    events.publish(SessionEvent::ended(reason));
}

/// 可观察的会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Active,
    /// 活跃，且有令牌刷新在进行
    Renewing,
}

/// 认证端点路径，相对 API 基础地址
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub login: String,
    pub signup: String,
    pub refresh: String,
    pub logout: String,
    pub current_user: String,
    pub check_username: String,
    pub check_admin: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            signup: "/auth/signup".to_string(),
            refresh: "/auth/refresh".to_string(),
            logout: "/auth/logout".to_string(),
            current_user: "/auth/me".to_string(),
            check_username: "/auth/check-username".to_string(),
            check_admin: "/auth/check-admin".to_string(),
        }
    }
}

impl From<&ApiConfig> for AuthEndpoints {
    fn from(config: &ApiConfig) -> Self {
        Self {
            login: config.login_path.clone(),
            signup: config.signup_path.clone(),
            refresh: config.refresh_path.clone(),
            logout: config.logout_path.clone(),
            current_user: config.current_user_path.clone(),
            check_username: config.check_username_path.clone(),
            check_admin: config.check_admin_path.clone(),
        }
    }
}

pub struct SessionController {
    transport: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    events: SessionEvents,
    coordinator: RefreshCoordinator,
    pipeline: RenewOnExpiry<RequestDispatcher>,
    endpoints: AuthEndpoints,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<CredentialStore>,
        endpoints: AuthEndpoints,
    ) -> Self {
        Self::with_events(transport, store, endpoints, SessionEvents::default())
    }

    /// 构建在 `events` 上发布事件的控制器，不构成完整会话的持久化状态在此清除
    pub fn with_events(
        transport: Arc<dyn HttpTransport>,
        store: Arc<CredentialStore>,
        endpoints: AuthEndpoints,
        events: SessionEvents,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            events.clone(),
            endpoints.refresh.clone(),
        );
        let pipeline = RenewOnExpiry::new(
            RequestDispatcher::new(transport.clone(), store.clone()),
            store.clone(),
            coordinator.clone(),
        );

        let controller = Self {
            transport,
            store,
            events,
            coordinator,
            pipeline,
            endpoints,
        };
        controller.restore();
        controller
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.api)?);
        let store = Arc::new(CredentialStore::from_config(&config.storage)?);
        Ok(Self::new(transport, store, AuthEndpoints::from(&config.api)))
    }

    fn restore(&self) {
        if self.store.has_partial_session() {
            warn!("Stored session is incomplete, clearing it");
            end_session(&self.store, &self.events, EndReason::InconsistentState);
        } else if let Some(user) = self.store.user() {
            debug!(username = %user.username, "Restored stored session");
        }
    }

    pub fn state(&self) -> SessionState {
        if !self.store.is_authenticated() {
            SessionState::LoggedOut
        } else if self.coordinator.is_in_flight() {
            SessionState::Renewing
        } else {
            SessionState::Active
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> Arc<CredentialStore> {
        self.store.clone()
    }

    pub fn gate(&self) -> AuthorizationGate {
        AuthorizationGate::new(self.store.clone())
    }

    /// 当前会话的缓存用户
    pub fn user(&self) -> Option<SessionUser> {
        self.store.user()
    }

    /// 以用户名和密码换取会话
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<SessionUser> {
        if credentials.username.trim().is_empty() {
            return Err(SessionError::Validation(vec!["Username is required".to_string()]));
        }

        let request = ApiRequest::post(self.endpoints.login.as_str())
            .json(credentials.to_body())
            .anonymous();
        let response = self.transport.send(&request, None).await?;

        match response.status {
            200..=299 => {}
            400 | 401 => {
                info!(username = %credentials.username.trim(), "Login rejected");
                return Err(SessionError::InvalidCredentials(
                    response
                        .message()
                        .unwrap_or_else(|| "Invalid username or password".to_string()),
                ));
            }
            status => {
                return Err(SessionError::Api {
                    status,
                    message: response.error_message(),
                })
            }
        }

        let payload: LoginPayload = response.data()?;
        if payload.access_token.is_empty() || payload.refresh_token.is_empty() {
            return Err(SessionError::MalformedResponse(
                "login response is missing a token".into(),
            ));
        }

        let credential = Credential::new(payload.access_token, payload.refresh_token);
        self.store.set_session(&credential, &payload.user);

        info!(
            username = %payload.user.username,
            role = %payload.user.role,
            "Login succeeded"
        );
        self.events.publish(SessionEvent::started(&payload.user.username));

        Ok(payload.user)
    }

    /// 注册新账户，表单无效时不发出任何请求
    pub async fn signup(&self, request: SignupRequest) -> Result<SignupReceipt> {
        let request = request.normalized();
        request
            .validate()
            .map_err(|e| SessionError::Validation(validation_messages(&e)))?;

        let body = serde_json::to_value(&request)
            .map_err(|e| SessionError::MalformedResponse(e.to_string()))?;
        let api_request = ApiRequest::post(self.endpoints.signup.as_str())
            .json(body)
            .anonymous();

        let receipt: SignupReceipt = self.fetch(api_request).await?;
        info!(username = %receipt.username, user_id = receipt.user_id, "Account registered");
        Ok(receipt)
    }

    /// 结束会话：先清除本地状态，再尽力通知服务端
    pub async fn logout(&self) {
        let token = self.store.access_token();
        end_session(&self.store, &self.events, EndReason::Logout);

        let Some(token) = token else {
            return;
        };

        let request = ApiRequest::post(self.endpoints.logout.as_str()).with_bearer(token.as_str());
        match self.transport.send(&request, Some(&token)).await {
            Ok(response) if response.is_success() => debug!("Server acknowledged logout"),
            Ok(response) => warn!(status = response.status, "Server logout failed"),
            Err(e) => warn!(error = %e, "Server logout failed"),
        }
    }

    /// 重新获取当前用户并更新缓存
    pub async fn current_user(&self) -> Result<SessionUser> {
        let user: SessionUser = self
            .fetch(ApiRequest::get(self.endpoints.current_user.as_str()))
            .await?;

        if self.store.is_authenticated() {
            self.store.set_user(&user);
        }
        Ok(user)
    }

    /// `username` 是否仍可注册
    pub async fn username_available(&self, username: &str) -> Result<bool> {
        let username = username.trim();
        if !(4..=20).contains(&username.chars().count()) || !USERNAME_PATTERN.is_match(username) {
            return Err(SessionError::Validation(vec![
                "Username must be 4-20 letters, digits or underscores".to_string(),
            ]));
        }

        let path = format!(
            "{}/{}",
            self.endpoints.check_username.trim_end_matches('/'),
            username
        );
        let check: UsernameCheck = self.fetch(ApiRequest::get(path).anonymous()).await?;
        Ok(!check.exists)
    }

    /// 向服务端确认 `username` 是否为 ADMIN
    pub async fn verify_admin(&self, username: &str) -> Result<bool> {
        let path = format!(
            "{}/{}",
            self.endpoints.check_admin.trim_end_matches('/'),
            username.trim()
        );
        let check: AdminCheck = self.fetch(ApiRequest::get(path)).await?;
        Ok(check.is_admin)
    }

    /// 经续期管线发送 API 请求
    pub async fn send(&self, request: ApiRequest) -> Result<RawResponse> {
        self.pipeline.handle(request).await
    }

    /// 发送请求并取出响应的 `data`
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.data()
    }
}
