//! 统一错误模型
//! 会话层所有操作共享的错误类型与用户可见消息

use thiserror::Error;

/// 会话层错误类型
///
/// 实现 `Clone`：同一次令牌刷新的结果需要分发给所有等待者。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Session expired")]
    SessionExpired {
        /// 刷新失败后会话已被强制结束
        terminated: bool,
    },

    #[error("Access denied")]
    Forbidden,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredentials,
    NoRefreshToken,
    RefreshFailed,
    SessionExpired,
    SessionTerminated,
    Forbidden,
    NetworkError,
    MalformedResponse,
    Validation,
    Api,
    Config,
}

impl SessionError {
    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            SessionError::NoRefreshToken => ErrorKind::NoRefreshToken,
            SessionError::RefreshFailed(_) => ErrorKind::RefreshFailed,
            SessionError::SessionExpired { terminated: true } => ErrorKind::SessionTerminated,
            SessionError::SessionExpired { terminated: false } => ErrorKind::SessionExpired,
            SessionError::Forbidden => ErrorKind::Forbidden,
            SessionError::Network(_) => ErrorKind::NetworkError,
            SessionError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            SessionError::Validation(_) => ErrorKind::Validation,
            SessionError::Api { .. } => ErrorKind::Api,
            SessionError::Config(_) => ErrorKind::Config,
        }
    }

    /// 请求失败且会话已被结束（需要重新登录）
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, SessionError::SessionExpired { terminated: true })
    }

    /// 获取用户友好的错误消息（不包含令牌或内部细节）
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidCredentials(msg) => msg.clone(),
            SessionError::NoRefreshToken => "Login required".to_string(),
            SessionError::RefreshFailed(_) | SessionError::SessionExpired { terminated: true } => {
                "Session expired, please log in again".to_string()
            }
            SessionError::SessionExpired { terminated: false } => "Login required".to_string(),
            SessionError::Forbidden => "Access denied".to_string(),
            SessionError::Network(_) => "Unable to reach the server".to_string(),
            SessionError::MalformedResponse(_) => "Unexpected response from the server".to_string(),
            SessionError::Validation(messages) => messages.join("\n"),
            SessionError::Api { message, .. } => message.clone(),
            SessionError::Config(_) => "Configuration error".to_string(),
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for SessionError {
    fn from(e: config::ConfigError) -> Self {
        SessionError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_flag_changes_kind() {
        assert_eq!(
            SessionError::SessionExpired { terminated: false }.kind(),
            ErrorKind::SessionExpired
        );
        assert_eq!(
            SessionError::SessionExpired { terminated: true }.kind(),
            ErrorKind::SessionTerminated
        );
        assert!(SessionError::SessionExpired { terminated: true }.is_session_terminated());
        assert!(!SessionError::Forbidden.is_session_terminated());
    }

    #[test]
    fn test_forced_logout_message() {
        let err = SessionError::SessionExpired { terminated: true };
        assert_eq!(err.user_message(), "Session expired, please log in again");
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let err = SessionError::Network("error sending request for url (http://10.0.0.1/api)".into());
        let message = err.user_message();
        assert_eq!(message, "Unable to reach the server");
        assert!(!message.contains("10.0.0.1"));
    }

    #[test]
    fn test_validation_display_joins_messages() {
        let err = SessionError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Validation failed: a; b");
        assert_eq!(err.user_message(), "a\nb");
    }
}
