//! 单飞令牌刷新
//!
//! 同一时刻至多一个刷新交换在进行，期间请求续期的调用方加入它并获得同一结果。
//! 交换在独立任务中运行，某个调用方放弃等待不会中止其他人的续期。
//!
//! 续期结果只交还给同一会话（同一代数）的请求。会话在交换期间被登出或替换时，
//! 结果不写入存储，等待方得到失败。

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EndReason, SessionEvent, SessionEvents};
use crate::lifecycle;
use crate::models::{Credential, RefreshPayload};
use crate::store::{CredentialStore, SessionPin};
use crate::transport::{ApiRequest, HttpTransport};

type RefreshOutcome = std::result::Result<String, SessionError>;
type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

enum RefreshState {
    Idle,
    InFlight {
        generation: u64,
        receiver: OutcomeReceiver,
    },
}

/// 一次 `refresh` 调用在锁内做出的决定
enum Step {
    Ready(String),
    Join(OutcomeReceiver),
    /// 旧会话的交换仍在进行，等它结束后重新判断
    Drain(OutcomeReceiver),
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    events: SessionEvents,
    refresh_path: String,
    state: Mutex<RefreshState>,
}

/// 访问令牌续期协调器
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<CredentialStore>,
        events: SessionEvents,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                events,
                refresh_path: refresh_path.into(),
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    /// 在 `pin` 对应的请求被拒后取得可用的访问令牌。
    ///
    /// 同一会话内访问令牌已被其他续期替换时直接返回存储中的令牌，不再请求服务端。
    /// 会话已不是 `pin` 记录的那一个时返回 `RefreshFailed`。失败时会话已结束。
    pub async fn refresh(&self, pin: &SessionPin) -> Result<String> {
        loop {
            match self.begin(pin)? {
                Step::Ready(token) => return Ok(token),
                Step::Join(receiver) => return wait_outcome(receiver).await,
                Step::Drain(receiver) => {
                    let _ = wait_outcome(receiver).await;
                }
            }
        }
    }

    fn begin(&self, pin: &SessionPin) -> Result<Step> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.inner.store.pin();

        if let RefreshState::InFlight {
            generation,
            receiver,
        } = &*state
        {
            if is_live(receiver) {
                if *generation == pin.generation {
                    debug!("Joining in-flight token refresh");
                    metrics::counter!("session_refresh_joined_total").increment(1);
                    return Ok(Step::Join(receiver.clone()));
                }
                if current.generation != pin.generation {
                    return Err(session_changed());
                }
                return Ok(Step::Drain(receiver.clone()));
            }
        }

        if current.generation != pin.generation {
            debug!("Session changed since the request was sent");
            return Err(session_changed());
        }

        if let Some(token) = current.access_token {
            if pin.access_token.as_deref() != Some(token.as_str()) {
                debug!("Access token already renewed, reusing it");
                return Ok(Step::Ready(token));
            }
        }

        let Some(refresh_token) = self.inner.store.refresh_token() else {
            lifecycle::end_session(
                &self.inner.store,
                &self.inner.events,
                EndReason::MissingRefreshToken,
            );
            return Err(SessionError::NoRefreshToken);
        };

        let (sender, receiver) = watch::channel(None);
        *state = RefreshState::InFlight {
            generation: pin.generation,
            receiver: receiver.clone(),
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = inner.exchange(&refresh_token).await;
            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            sender.send_replace(Some(outcome));
            *state = RefreshState::Idle;
        });

        Ok(Step::Join(receiver))
    }

    /// 是否有交换正在进行
    pub fn is_in_flight(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*state, RefreshState::InFlight { receiver, .. } if is_live(receiver))
    }
}

/// 任务已消失（panic 或被中止）的进行中标记视为无效
fn is_live(receiver: &OutcomeReceiver) -> bool {
    receiver.has_changed().is_ok()
}

fn session_changed() -> SessionError {
    SessionError::RefreshFailed("session changed during renewal".into())
}

async fn wait_outcome(mut receiver: OutcomeReceiver) -> Result<String> {
    let outcome = receiver
        .wait_for(Option::is_some)
        .await
        .map(|value| value.clone())
        .map_err(|_| SessionError::RefreshFailed("refresh task ended unexpectedly".into()))?;

    outcome.unwrap_or_else(|| {
        Err(SessionError::RefreshFailed(
            "refresh finished without a result".into(),
        ))
    })
}

impl Inner {
    async fn exchange(&self, refresh_token: &str) -> RefreshOutcome {
        debug!(path = %self.refresh_path, "Exchanging refresh token");

        match self.request_credential(refresh_token).await {
            Ok(credential) => {
                if !self.store.rotate_credential(refresh_token, &credential) {
                    metrics::counter!("session_refresh_total", "outcome" => "discarded")
                        .increment(1);
                    info!("Session changed during token refresh, result discarded");
                    return Err(session_changed());
                }

                metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
                self.events.publish(SessionEvent::renewed());
                info!("Access token renewed");
                Ok(credential.access_token().to_string())
            }
            Err(e) => {
                metrics::counter!("session_refresh_total", "outcome" => "failure").increment(1);
                warn!(error = %e, "Token refresh failed, ending session");

                if self.store.clear_if_refresh_token(refresh_token) {
                    lifecycle::announce_end(&self.events, EndReason::RefreshFailed);
                }

                Err(match e {
                    SessionError::RefreshFailed(_) => e,
                    other => SessionError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    async fn request_credential(&self, refresh_token: &str) -> Result<Credential> {
        let request = ApiRequest::post(self.refresh_path.as_str())
            .json(serde_json::json!({ "refreshToken": refresh_token }))
            .anonymous();

        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            return Err(SessionError::RefreshFailed(response.error_message()));
        }

        let payload: RefreshPayload = response.data()?;
        if payload.access_token.trim().is_empty() {
            return Err(SessionError::MalformedResponse(
                "refresh response has an empty access token".into(),
            ));
        }

        // 服务端未轮换时沿用原刷新令牌
        let refresh = payload
            .refresh_token
            .filter(|token| !token.trim().is_empty())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(Credential::new(payload.access_token, refresh))
    }
}
