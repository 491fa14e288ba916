//! 会话生命周期集成测试
//!
//! 登录、续期、强制登出、准入与注册流程

mod common;

use common::{drain_events, fake_server, harness, harness_with_store, logged_in, store_is_empty};
use portal_session::{
    models::SessionUser,
    store::{CredentialStore, FileStorage, MemoryStorage, StorageBackend, ACCESS_TOKEN_KEY},
    ApiRequest, DenyReason, EndReason, GateDecision, LoginCredentials, Role, SessionError,
    SessionEvent, SessionState, SignupRequest,
};
use std::sync::Arc;

// ==================== 登录测试 ====================

#[tokio::test]
async fn test_login_stores_issued_credential() {
    let h = harness(fake_server());

    let user = h
        .controller
        .login(&LoginCredentials::new("teacher_kim", "password1"))
        .await
        .unwrap();

    assert_eq!(user.username, "teacher_kim");
    assert_eq!(h.store.user(), Some(user));
    assert_eq!(h.controller.state(), SessionState::Active);

    let issued = h.store.access_token();
    assert!(issued.is_some());
    h.controller.send(ApiRequest::get("/courses")).await.unwrap();
    assert_eq!(h.server.bearers_for("/courses"), vec![issued]);
}

#[tokio::test]
async fn test_invalid_login_stores_nothing() {
    let mut h = harness(fake_server());

    let result = h
        .controller
        .login(&LoginCredentials::new("teacher_kim", "not-the-password"))
        .await;

    assert!(matches!(result, Err(SessionError::InvalidCredentials(_))));
    assert!(store_is_empty(&h.store));
    assert_eq!(h.controller.state(), SessionState::LoggedOut);
    assert!(drain_events(&mut h.events).is_empty());
}

// ==================== 令牌续期测试 ====================

#[tokio::test]
async fn test_expired_access_token_is_renewed_and_retried() {
    let mut h = logged_in(fake_server(), common::TEACHER).await;
    let a1 = h.store.access_token();
    let r1 = h.store.refresh_token();
    h.server.expire_access_tokens();

    let response = h.controller.send(ApiRequest::get("/courses")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(h.server.refresh_exchanges(), 1);
    let a2 = h.store.access_token();
    assert_ne!(a1, a2);
    assert_eq!(h.server.bearers_for("/courses"), vec![a1, a2]);
    // 服务端未轮换刷新令牌
    assert_eq!(h.store.refresh_token(), r1);
    assert!(matches!(
        drain_events(&mut h.events).as_slice(),
        [SessionEvent::Renewed { .. }]
    ));
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let h = logged_in(fake_server().rotate_refresh_tokens(), common::TEACHER).await;
    let r1 = h.store.refresh_token();
    h.server.expire_access_tokens();

    h.controller.send(ApiRequest::get("/courses")).await.unwrap();

    let r2 = h.store.refresh_token();
    assert!(r2.is_some());
    assert_ne!(r1, r2);
    assert!(h.store.is_authenticated());
}

#[tokio::test]
async fn test_revoked_refresh_token_forces_logout() {
    let mut h = logged_in(fake_server(), common::TEACHER).await;
    h.server.expire_access_tokens();
    h.server.revoke_refresh_tokens();

    let err = h
        .controller
        .send(ApiRequest::get("/courses"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::SessionExpired { terminated: true });
    assert!(err.is_session_terminated());
    assert_eq!(err.user_message(), "Session expired, please log in again");
    assert!(store_is_empty(&h.store));
    assert_eq!(h.controller.state(), SessionState::LoggedOut);
    assert!(matches!(
        drain_events(&mut h.events).as_slice(),
        [SessionEvent::Ended {
            reason: EndReason::RefreshFailed,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_second_rejection_is_not_retried_again() {
    let h = logged_in(fake_server(), common::TEACHER).await;
    h.server.reject_access_tokens();

    let err = h
        .controller
        .send(ApiRequest::get("/courses"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::SessionExpired { terminated: false });
    assert_eq!(h.server.refresh_exchanges(), 1);
    assert_eq!(h.server.bearers_for("/courses").len(), 2);
    // 硬失败但不强制登出
    assert!(h.store.is_authenticated());
}

#[tokio::test]
async fn test_forbidden_never_refreshes() {
    let h = logged_in(fake_server(), common::TEACHER).await;

    let err = h
        .controller
        .send(ApiRequest::get("/admin/users"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::Forbidden);
    assert_eq!(h.server.refresh_exchanges(), 0);
    assert!(h.store.is_authenticated());
}

#[tokio::test]
async fn test_valid_token_shared_without_refresh() {
    let h = logged_in(fake_server(), common::TEACHER).await;

    let (p, q) = tokio::join!(
        h.controller.send(ApiRequest::get("/courses/1")),
        h.controller.send(ApiRequest::get("/courses/2")),
    );

    assert!(p.is_ok());
    assert!(q.is_ok());
    assert_eq!(h.server.refresh_exchanges(), 0);
    let token = h.store.access_token();
    assert_eq!(h.server.bearers_for("/courses/1"), vec![token.clone()]);
    assert_eq!(h.server.bearers_for("/courses/2"), vec![token]);
}

#[tokio::test]
async fn test_anonymous_request_is_not_renewed() {
    let h = logged_in(fake_server(), common::TEACHER).await;

    let err = h
        .controller
        .send(ApiRequest::get("/courses").anonymous())
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::SessionExpired { terminated: false });
    assert_eq!(h.server.bearers_for("/courses"), vec![None]);
    assert_eq!(h.server.refresh_exchanges(), 0);
}

#[tokio::test]
async fn test_rejection_without_session_needs_login() {
    let h = harness(fake_server());

    let err = h
        .controller
        .send(ApiRequest::get("/courses"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::SessionExpired { terminated: false });
    assert_eq!(err.user_message(), "Login required");
    assert_eq!(h.server.refresh_exchanges(), 0);
}

// ==================== 登出测试 ====================

#[tokio::test]
async fn test_logout_clears_even_when_server_fails() {
    let mut h = logged_in(fake_server().fail_logout(), common::TEACHER).await;

    h.controller.logout().await;

    assert!(store_is_empty(&h.store));
    assert_eq!(h.server.logout_calls(), 1);
    assert_eq!(h.controller.state(), SessionState::LoggedOut);
    assert!(matches!(
        drain_events(&mut h.events).as_slice(),
        [SessionEvent::Ended {
            reason: EndReason::Logout,
            ..
        }]
    ));

    // 幂等
    h.controller.logout().await;
    assert!(drain_events(&mut h.events).is_empty());
}

#[tokio::test]
async fn test_logout_sends_current_token() {
    let h = logged_in(fake_server(), common::TEACHER).await;
    let token = h.store.access_token();

    h.controller.logout().await;

    assert_eq!(h.server.bearers_for("/auth/logout"), vec![token]);
}

// ==================== 准入测试 ====================

#[tokio::test]
async fn test_gate_follows_session() {
    let h = logged_in(fake_server(), common::TEACHER).await;
    let gate = h.controller.gate();

    assert_eq!(
        gate.authorize(Role::Admin),
        GateDecision::Deny(DenyReason::Forbidden)
    );
    assert!(gate.authorize(Role::Teacher).is_admitted());

    h.controller.logout().await;
    assert_eq!(
        gate.authorize(Role::Teacher),
        GateDecision::Deny(DenyReason::Unauthenticated)
    );
}

#[tokio::test]
async fn test_gate_admits_admin_after_login() {
    let h = logged_in(fake_server(), common::ADMIN).await;

    let decision = h.controller.gate().authorize(Role::Admin);

    assert!(decision.is_admitted());
    assert_eq!(decision.user().map(|u| u.username.as_str()), Some("admin"));
}

#[tokio::test]
async fn test_server_check_disagrees_with_tampered_cache() {
    let h = logged_in(fake_server(), common::TEACHER).await;
    let mut user = h.store.user().unwrap();
    user.role = Role::Admin;
    h.store.set_user(&user);

    assert!(h.controller.gate().authorize(Role::Admin).is_admitted());
    assert!(!h.controller.verify_admin("teacher_kim").await.unwrap());
    assert_eq!(
        h.controller
            .send(ApiRequest::get("/admin/users"))
            .await
            .unwrap_err(),
        SessionError::Forbidden
    );
}

// ==================== 会话恢复测试 ====================

#[tokio::test]
async fn test_partial_session_cleared_on_startup() {
    let backend = Arc::new(MemoryStorage::new());
    backend
        .set_many(&[(ACCESS_TOKEN_KEY, "access-99".to_string())])
        .unwrap();
    let store = Arc::new(CredentialStore::new(backend));

    let mut h = harness_with_store(fake_server(), store);

    assert!(store_is_empty(&h.store));
    assert_eq!(h.controller.state(), SessionState::LoggedOut);
    assert!(matches!(
        drain_events(&mut h.events).as_slice(),
        [SessionEvent::Ended {
            reason: EndReason::InconsistentState,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_file_session_survives_restart() {
    let dir = std::env::temp_dir().join(format!("portal-session-{}", uuid::Uuid::new_v4()));
    let path = dir.join("session.json");
    let server = fake_server();
    let (credential, user) = server.issue_session("teacher_kim");

    let first = Arc::new(CredentialStore::new(Arc::new(FileStorage::new(&path))));
    first.set_session(&credential, &user);
    drop(first);

    let store = Arc::new(CredentialStore::new(Arc::new(FileStorage::new(&path))));
    let h = harness_with_store(server, store);

    assert_eq!(h.controller.state(), SessionState::Active);
    assert_eq!(
        h.controller.user().map(|u: SessionUser| u.username),
        Some("teacher_kim".to_string())
    );
    h.controller.send(ApiRequest::get("/courses")).await.unwrap();

    let _ = std::fs::remove_dir_all(dir);
}

// ==================== 当前用户测试 ====================

#[tokio::test]
async fn test_current_user_renews_when_expired() {
    let h = logged_in(fake_server(), common::ADMIN).await;
    h.server.expire_access_tokens();

    let user = h.controller.current_user().await.unwrap();

    assert!(user.is_admin());
    assert_eq!(h.server.refresh_exchanges(), 1);
}

// ==================== 注册测试 ====================

fn signup_form(username: &str) -> SignupRequest {
    SignupRequest {
        username: username.to_string(),
        password: "Secret123!".to_string(),
        confirm_password: "Secret123!".to_string(),
        email: Some("park@example.com".to_string()),
        organization: "Busan High School".to_string(),
        role: Role::default(),
        phone: "01098765432".to_string(),
        drone_experience: true,
        terms_agreed: true,
    }
}

#[tokio::test]
async fn test_invalid_signup_never_reaches_server() {
    let h = harness(fake_server());
    let form = SignupRequest {
        password: "short".to_string(),
        confirm_password: "shorter".to_string(),
        terms_agreed: false,
        ..signup_form("park_s")
    };

    let err = h.controller.signup(form).await.unwrap_err();

    match err {
        SessionError::Validation(messages) => {
            assert!(messages.contains(&"Password must be 8-50 characters".to_string()));
            assert!(messages.contains(&"Passwords do not match".to_string()));
            assert!(messages.contains(&"Terms of service must be accepted".to_string()));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(h.server.requests().is_empty());
}

#[tokio::test]
async fn test_signup_then_login() {
    let h = harness(fake_server());

    let receipt = h.controller.signup(signup_form("park_s")).await.unwrap();
    assert_eq!(receipt.username, "park_s");

    let user = h
        .controller
        .login(&LoginCredentials::new("park_s", "Secret123!"))
        .await
        .unwrap();
    assert_eq!(user.role, Role::General);
    assert_eq!(user.id, receipt.user_id);
}

#[tokio::test]
async fn test_duplicate_signup_is_rejected_by_server() {
    let h = harness(fake_server());

    let err = h
        .controller
        .signup(signup_form("teacher_kim"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SessionError::Api {
            status: 409,
            message: "Username already exists".to_string()
        }
    );
}
