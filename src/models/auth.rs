//! 认证相关模型

use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use validator::{Validate, ValidationError, ValidationErrors};

use super::user::{Role, SessionUser};

pub static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid username pattern"));

pub static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{10,11}$").expect("valid phone pattern"));

/// 密码允许的特殊字符
pub const PASSWORD_SYMBOLS: &str = "@$!%*?&";

/// 所有 API 端点共用的响应包装
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl<T> ApiEnvelope<T> {
    /// 可读消息，`error` 优先于 `message`
    pub fn describe(&self) -> Option<String> {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .filter(|m| !m.trim().is_empty())
    }
}

/// 访问令牌与刷新令牌，对客户端不透明
pub struct Credential {
    access_token: SecretString,
    refresh_token: SecretString,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: SecretString::new(refresh_token.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret().as_str()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret().as_str()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// 有效凭据及其所属用户
#[derive(Debug)]
pub struct Session {
    pub credential: Credential,
    pub user: SessionUser,
}

/// 登录表单
pub struct LoginCredentials {
    pub username: String,
    pub password: SecretString,
    pub remember_me: bool,
}

impl LoginCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: SecretString::new(password.to_string()),
            remember_me: false,
        }
    }

    /// 登录接口的请求体
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username.trim(),
            "password": self.password.expose_secret(),
            "rememberMe": self.remember_me,
        })
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// 登录成功时的 `data`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub user: SessionUser,
}

/// 刷新成功时的 `data`，仅在服务端轮换时携带刷新令牌
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// 注册表单
#[derive(Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(
        length(min = 4, max = 20, message = "Username must be 4-20 characters"),
        regex(
            path = *USERNAME_PATTERN,
            message = "Username may only contain letters, digits and underscores"
        )
    )]
    pub username: String,

    #[validate(
        length(min = 8, max = 50, message = "Password must be 8-50 characters"),
        custom(function = "validate_password_strength")
    )]
    pub password: String,

    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,

    #[validate(email(message = "Invalid email address"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Organization must be 1-100 characters"))]
    pub organization: String,

    pub role: Role,

    #[validate(regex(path = *PHONE_PATTERN, message = "Phone number must be 10-11 digits"))]
    pub phone: String,

    pub drone_experience: bool,

    #[validate(custom(function = "validate_terms_agreed"))]
    pub terms_agreed: bool,
}

/// 大写、小写、数字与特殊字符各至少一个，且不含其他字符
fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let is_symbol = |c: char| PASSWORD_SYMBOLS.contains(c);
    let allowed = password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || is_symbol(c));
    let complete = password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(is_symbol);

    if allowed && complete {
        Ok(())
    } else {
        Err(ValidationError::new("password_strength").with_message(Cow::Borrowed(
            "Password must contain upper and lower case letters, a digit and one of @$!%*?&",
        )))
    }
}

fn validate_terms_agreed(agreed: &bool) -> Result<(), ValidationError> {
    if *agreed {
        Ok(())
    } else {
        Err(ValidationError::new("terms_agreed")
            .with_message(Cow::Borrowed("Terms of service must be accepted")))
    }
}

impl SignupRequest {
    /// 按注册表单提交方式去除文本字段首尾空白
    pub fn normalized(mut self) -> Self {
        self.username = self.username.trim().to_string();
        self.organization = self.organization.trim().to_string();
        self.phone = self.phone.trim().to_string();
        self.email = self
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        self
    }
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("organization", &self.organization)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// 注册成功时的 `data`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupReceipt {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct UsernameCheck {
    pub exists: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCheck {
    pub is_admin: bool,
    pub username: String,
}

/// 把校验结果展开为排序后的提示消息
pub fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut messages = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for error in field_errors.iter() {
            let message = match &error.message {
                Some(message) => message.to_string(),
                None => format!("Invalid value for {}", field),
            };
            messages.push(message);
        }
    }
    messages.sort();
    messages
}
