//! 进程内的门户认证 API 假服务端
//!
//! 直接实现 [`HttpTransport`]，无需网络即可驱动整个会话层。
//! 令牌按 `access-{n}` / `refresh-{n}` 签发；`/admin` 下的路径要求 ADMIN 角色，
//! 其余未知路径回显当前认证用户。

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::Result;
use crate::models::{Credential, Role, SessionUser};
use crate::transport::{ApiRequest, HttpTransport, RawResponse};

/// 假服务端收到的一次请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
}

struct Account {
    password: String,
    user: SessionUser,
}

#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, Account>,
    next_id: i64,
    next_token: u64,
    /// 令牌 -> 用户名
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    reject_access_tokens: bool,
    refresh_exchanges: usize,
    logout_calls: usize,
    requests: Vec<RecordedRequest>,
}

impl ServerState {
    fn account_for(&mut self, username: &str) -> &mut Account {
        let next_id = &mut self.next_id;
        self.accounts
            .entry(username.to_string())
            .or_insert_with(|| {
                *next_id += 1;
                Account {
                    password: String::new(),
                    user: SessionUser::new(*next_id, username, Role::General),
                }
            })
    }

    fn issue_access(&mut self, username: &str) -> String {
        self.next_token += 1;
        let token = format!("access-{}", self.next_token);
        self.access_tokens.insert(token.clone(), username.to_string());
        token
    }

    fn issue_refresh(&mut self, username: &str) -> String {
        self.next_token += 1;
        let token = format!("refresh-{}", self.next_token);
        self.refresh_tokens.insert(token.clone(), username.to_string());
        token
    }

    fn authenticated(&self, bearer: Option<&str>) -> Option<SessionUser> {
        if self.reject_access_tokens {
            return None;
        }
        let username = self.access_tokens.get(bearer?)?;
        self.accounts.get(username).map(|account| account.user.clone())
    }
}

pub struct FakeAuthServer {
    state: Mutex<ServerState>,
    rotate_refresh_tokens: bool,
    refresh_delay: Option<Duration>,
    path_delays: HashMap<String, Duration>,
    fail_logout: bool,
}

impl Default for FakeAuthServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAuthServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            rotate_refresh_tokens: false,
            refresh_delay: None,
            path_delays: HashMap::new(),
            fail_logout: false,
        }
    }

    pub fn with_account(self, username: &str, password: &str, role: Role) -> Self {
        {
            let mut state = self.lock();
            let account = state.account_for(username);
            account.password = password.to_string();
            account.user.role = role;
        }
        self
    }

    /// 每次交换都签发新的刷新令牌
    pub fn rotate_refresh_tokens(mut self) -> Self {
        self.rotate_refresh_tokens = true;
        self
    }

    /// 每次刷新交换挂起 `delay`
    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// 发往 `path` 的请求先挂起 `delay` 再处理（令牌在发送时已记录）
    pub fn path_delay(mut self, path: &str, delay: Duration) -> Self {
        self.path_delays.insert(path.to_string(), delay);
        self
    }

    /// 登出请求返回 500
    pub fn fail_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 直接签发会话，相当于 `username` 之前已登录
    pub fn issue_session(&self, username: &str) -> (Credential, SessionUser) {
        let mut state = self.lock();
        let user = state.account_for(username).user.clone();
        let access = state.issue_access(username);
        let refresh = state.issue_refresh(username);
        (Credential::new(access, refresh), user)
    }

    /// 使已签发的访问令牌全部失效
    pub fn expire_access_tokens(&self) {
        self.lock().access_tokens.clear();
    }

    /// 使已签发的刷新令牌全部失效
    pub fn revoke_refresh_tokens(&self) {
        self.lock().refresh_tokens.clear();
    }

    /// 此后所有需认证的请求都返回 401
    pub fn reject_access_tokens(&self) {
        self.lock().reject_access_tokens = true;
    }

    pub fn refresh_exchanges(&self) -> usize {
        self.lock().refresh_exchanges
    }

    pub fn logout_calls(&self) -> usize {
        self.lock().logout_calls
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// 发往 `path` 的令牌，按到达顺序
    pub fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.path == path)
            .map(|request| request.bearer.clone())
            .collect()
    }

    fn login(&self, body: &Value) -> RawResponse {
        let username = str_field(body, "username");
        let password = str_field(body, "password");

        let mut state = self.lock();
        let user = match state.accounts.get(username) {
            Some(account) if !account.password.is_empty() && account.password == password => {
                account.user.clone()
            }
            _ => return failure(401, "Invalid username or password"),
        };
        let access = state.issue_access(username);
        let refresh = state.issue_refresh(username);

        success(
            200,
            json!({ "accessToken": access, "refreshToken": refresh, "user": user }),
        )
    }

    fn signup(&self, body: &Value) -> RawResponse {
        let username = str_field(body, "username");
        let mut state = self.lock();
        if state.accounts.contains_key(username) {
            return failure(409, "Username already exists");
        }

        let role = str_field(body, "role").parse::<Role>().unwrap_or_default();
        let account = state.account_for(username);
        account.password = str_field(body, "password").to_string();
        account.user.role = role;
        account.user.email = body
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string);
        account.user.organization = body
            .get("organization")
            .and_then(Value::as_str)
            .map(str::to_string);
        let user_id = account.user.id;

        success(201, json!({ "userId": user_id, "username": username }))
    }

    async fn refresh(&self, body: &Value) -> RawResponse {
        self.lock().refresh_exchanges += 1;
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }

        let presented = str_field(body, "refreshToken");
        let mut state = self.lock();
        let Some(username) = state.refresh_tokens.get(presented).cloned() else {
            return failure(401, "Invalid refresh token");
        };

        let access = state.issue_access(&username);
        if self.rotate_refresh_tokens {
            state.refresh_tokens.remove(presented);
            let refresh = state.issue_refresh(&username);
            success(200, json!({ "accessToken": access, "refreshToken": refresh }))
        } else {
            success(200, json!({ "accessToken": access }))
        }
    }

    fn logout(&self, bearer: Option<&str>) -> RawResponse {
        let mut state = self.lock();
        state.logout_calls += 1;
        if self.fail_logout {
            return failure(500, "Logout unavailable");
        }
        if let Some(token) = bearer {
            state.access_tokens.remove(token);
        }
        success(200, Value::Null)
    }

    fn route(&self, request: &ApiRequest, bearer: Option<&str>) -> RawResponse {
        let state = self.lock();
        let path = request.path.as_str();

        if let Some(username) = path.strip_prefix("/auth/check-username/") {
            return success(200, json!({ "exists": state.accounts.contains_key(username) }));
        }

        let Some(user) = state.authenticated(bearer) else {
            return failure(401, "Authentication required");
        };

        if let Some(username) = path.strip_prefix("/auth/check-admin/") {
            let is_admin = state
                .accounts
                .get(username)
                .is_some_and(|account| account.user.is_admin());
            return success(200, json!({ "isAdmin": is_admin, "username": username }));
        }

        if path == "/auth/me" {
            return success(200, json!(user));
        }

        if path.starts_with("/admin") && !user.is_admin() {
            return failure(403, "Access denied");
        }

        success(200, json!({ "path": path, "username": user.username }))
    }
}

#[async_trait]
impl HttpTransport for FakeAuthServer {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<RawResponse> {
        self.lock().requests.push(RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
        });

        if let Some(delay) = self.path_delays.get(&request.path) {
            tokio::time::sleep(*delay).await;
        }

        let body = request.body.clone().unwrap_or(Value::Null);
        let response = if request.method != Method::POST {
            self.route(request, bearer)
        } else {
            match request.path.as_str() {
                "/auth/login" => self.login(&body),
                "/auth/signup" => self.signup(&body),
                "/auth/refresh" => self.refresh(&body).await,
                "/auth/logout" => self.logout(bearer),
                _ => self.route(request, bearer),
            }
        };
        Ok(response)
    }
}

fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn success(status: u16, data: Value) -> RawResponse {
    RawResponse::new(
        status,
        json!({ "success": true, "message": "OK", "data": data }).to_string(),
    )
}

fn failure(status: u16, message: &str) -> RawResponse {
    RawResponse::new(
        status,
        json!({ "success": false, "message": message }).to_string(),
    )
}
