//! 受保护视图的角色准入
//!
//! 判定依据是本地缓存的用户记录，可能过期或被本地篡改，只决定渲染什么；
//! 每个操作仍由服务端校验（见 `SessionController::verify_admin`）。

use std::sync::Arc;
use tracing::debug;

use crate::models::{Role, SessionUser};
use crate::store::CredentialStore;

/// 拒绝准入的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// 没有缓存的用户记录
    Unauthenticated,
    /// 有缓存用户但缺少所需角色
    Forbidden,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "Please log in to continue",
            DenyReason::Forbidden => "You do not have permission to view this page",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Admit(SessionUser),
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Admit(_))
    }

    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            GateDecision::Admit(user) => Some(user),
            GateDecision::Deny(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    store: Arc<CredentialStore>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// 判定缓存用户能否进入要求 `required` 角色的视图
    pub fn authorize(&self, required: Role) -> GateDecision {
        let Some(user) = self.store.user() else {
            debug!(required = %required, "Gate denied: no cached user");
            return GateDecision::Deny(DenyReason::Unauthenticated);
        };

        if user.has_role(required) {
            GateDecision::Admit(user)
        } else {
            debug!(
                required = %required,
                actual = %user.role,
                username = %user.username,
                "Gate denied: role mismatch"
            );
            GateDecision::Deny(DenyReason::Forbidden)
        }
    }
}
