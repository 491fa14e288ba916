//! 凭据存储
//!
//! 访问令牌、刷新令牌与用户记录分别存放在独立的键下，残缺或损坏的状态可以被识别。
//! 读取从不失败，无法读取的值视为不存在；写入失败只记录日志，下次读取即视为未登录。
//!
//! 每次登录或清除都会推进会话代数（generation），令牌续期不会。
//! 请求发出时记下代数，续期结束后据此判断会话是否已被替换。

pub mod backend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::{Result, SessionError};
use crate::models::{Credential, Session, SessionUser};

pub use backend::{FileStorage, MemoryStorage, StorageBackend, StorageError};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// 请求发出时的会话快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPin {
    pub generation: u64,
    pub access_token: Option<String>,
}

pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    /// 串行化所有写操作，复合更新不会交错
    write_lock: Mutex<()>,
    generation: AtomicU64,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend.to_lowercase().as_str() {
            "memory" => Ok(Self::in_memory()),
            "file" => Ok(Self::new(Arc::new(FileStorage::new(&config.path)))),
            other => Err(SessionError::Config(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Credential storage unavailable, treating value as absent");
                None
            }
        }
    }

    fn write(&self, entries: &[(&str, String)]) {
        if let Err(e) = self.backend.set_many(entries) {
            warn!(error = %e, "Failed to persist session data");
        }
    }

    fn remove_session(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.backend.remove_many(&SESSION_KEYS) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Failed to clear session data");
                false
            }
        }
    }

    /// 当前会话代数
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 在写锁内同时读取代数与访问令牌
    pub fn pin(&self) -> SessionPin {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        SessionPin {
            generation: self.generation(),
            access_token: self.access_token(),
        }
    }

    /// 覆盖两个令牌，视为新会话
    pub fn set_credential(&self, credential: &Credential) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.write(&[
            (ACCESS_TOKEN_KEY, credential.access_token().to_string()),
            (REFRESH_TOKEN_KEY, credential.refresh_token().to_string()),
        ]);
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn set_user(&self, user: &SessionUser) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match serde_json::to_string(user) {
            Ok(json) => self.write(&[(USER_KEY, json)]),
            Err(e) => warn!(error = %e, "Failed to serialize user record"),
        }
    }

    /// 缓存的用户；记录损坏时视为不存在
    pub fn user(&self) -> Option<SessionUser> {
        let raw = self.read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Cached user record is corrupt");
                None
            }
        }
    }

    /// 一次写入凭据与用户
    pub fn set_session(&self, credential: &Credential, user: &SessionUser) {
        let user_json = match serde_json::to_string(user) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize user record");
                return;
            }
        };

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.write(&[
            (ACCESS_TOKEN_KEY, credential.access_token().to_string()),
            (REFRESH_TOKEN_KEY, credential.refresh_token().to_string()),
            (USER_KEY, user_json),
        ]);
    }

    /// 仅当存储的刷新令牌仍为 `expected_refresh` 时替换凭据（同一会话，代数不变）。
    /// 会话已结束或被替换时返回 false。
    pub fn rotate_credential(&self, expected_refresh: &str, credential: &Credential) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.refresh_token().as_deref() != Some(expected_refresh) {
            debug!("Stored refresh token changed during exchange, discarding result");
            return false;
        }
        self.write(&[
            (ACCESS_TOKEN_KEY, credential.access_token().to_string()),
            (REFRESH_TOKEN_KEY, credential.refresh_token().to_string()),
        ]);
        true
    }

    /// 仅当存储的刷新令牌仍为 `expected_refresh` 时清除全部会话数据
    pub fn clear_if_refresh_token(&self, expected_refresh: &str) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.refresh_token().as_deref() != Some(expected_refresh) {
            return false;
        }
        self.remove_session()
    }

    /// 三个值都存在且可读时才构成完整会话
    pub fn session(&self) -> Option<Session> {
        let access = self.access_token()?;
        let refresh = self.refresh_token()?;
        let user = self.user()?;
        Some(Session {
            credential: Credential::new(access, refresh),
            user,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    /// 存有部分会话数据，但不构成完整会话
    pub fn has_partial_session(&self) -> bool {
        let any_present = SESSION_KEYS.iter().any(|key| self.read(key).is_some());
        any_present && self.session().is_none()
    }

    /// 同时移除凭据与用户。幂等，返回是否移除了数据
    pub fn clear_all(&self) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove_session()
    }
}
