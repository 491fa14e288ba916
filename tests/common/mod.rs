//! 测试公共模块
//! 提供基于内存假服务端的会话控制器装配

#![allow(dead_code)]

use portal_session::{
    store::CredentialStore, testing::FakeAuthServer, AuthEndpoints, LoginCredentials, Role,
    SessionController, SessionEvent, SessionEvents,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const ADMIN: (&str, &str) = ("admin", "adminpass1");
pub const TEACHER: (&str, &str) = ("teacher_kim", "password1");

/// 带默认账户的假服务端
pub fn fake_server() -> FakeAuthServer {
    FakeAuthServer::new()
        .with_account(ADMIN.0, ADMIN.1, Role::Admin)
        .with_account(TEACHER.0, TEACHER.1, Role::Teacher)
}

pub struct Harness {
    pub server: Arc<FakeAuthServer>,
    pub store: Arc<CredentialStore>,
    pub controller: Arc<SessionController>,
    pub events: broadcast::Receiver<SessionEvent>,
}

/// 使用内存存储装配控制器
pub fn harness(server: FakeAuthServer) -> Harness {
    harness_with_store(server, Arc::new(CredentialStore::in_memory()))
}

pub fn harness_with_store(server: FakeAuthServer, store: Arc<CredentialStore>) -> Harness {
    let server = Arc::new(server);
    let events = SessionEvents::default();
    let receiver = events.subscribe();
    let controller = SessionController::with_events(
        server.clone(),
        store.clone(),
        AuthEndpoints::default(),
        events,
    );

    Harness {
        server,
        store,
        controller: Arc::new(controller),
        events: receiver,
    }
}

/// 装配并以指定账户登录
pub async fn logged_in(server: FakeAuthServer, account: (&str, &str)) -> Harness {
    let mut harness = harness(server);
    harness
        .controller
        .login(&LoginCredentials::new(account.0, account.1))
        .await
        .expect("login should succeed");
    drain_events(&mut harness.events);
    harness
}

/// 取出当前已发布的全部事件
pub fn drain_events(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// 三个存储值是否都已清除
pub fn store_is_empty(store: &CredentialStore) -> bool {
    store.access_token().is_none() && store.refresh_token().is_none() && store.user().is_none()
}
