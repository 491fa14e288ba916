//! 数据模型模块
//! 认证请求/响应、会话用户与角色

pub mod auth;
pub mod user;

pub use auth::{
    ApiEnvelope, Credential, LoginCredentials, LoginPayload, RefreshPayload, Session,
    SignupReceipt, SignupRequest,
};
pub use user::{Role, SessionUser, UnknownRole};
