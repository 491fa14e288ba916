//! 课程门户客户端会话层
//! 凭据存储、请求分发、单飞令牌刷新、会话生命周期与角色准入

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gate;
pub mod lifecycle;
pub mod models;
pub mod pipeline;
pub mod refresh;
pub mod store;
pub mod telemetry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use error::{ErrorKind, Result, SessionError};
pub use events::{EndReason, SessionEvent, SessionEvents};
pub use gate::{AuthorizationGate, DenyReason, GateDecision};
pub use lifecycle::{AuthEndpoints, SessionController, SessionState};
pub use models::{Credential, LoginCredentials, Role, SessionUser, SignupRequest};
pub use store::CredentialStore;
pub use transport::ApiRequest;
