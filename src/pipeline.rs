//! 请求管线
//!
//! [`RequestHandler`] 是调用方与网络之间的接缝。
//! [`RequestDispatcher`](crate::dispatcher::RequestDispatcher) 负责发送与分类；
//! [`RenewOnExpiry`] 包装任意处理器，把一次访问令牌过期变成一次协调刷新加一次重试。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::refresh::RefreshCoordinator;
use crate::store::{CredentialStore, SessionPin};
use crate::transport::{ApiRequest, Authorization, RawResponse};

#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// 发送请求，仅 2xx 返回 `Ok`
    async fn handle(&self, request: ApiRequest) -> Result<RawResponse>;
}

#[async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    async fn handle(&self, request: ApiRequest) -> Result<RawResponse> {
        (**self).handle(request).await
    }
}

/// 访问令牌过期后续期并重试一次
pub struct RenewOnExpiry<H> {
    inner: H,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl<H: RequestHandler> RenewOnExpiry<H> {
    pub fn new(inner: H, store: Arc<CredentialStore>, coordinator: RefreshCoordinator) -> Self {
        Self {
            inner,
            store,
            coordinator,
        }
    }

    /// 记下实际发送的令牌及其所属会话
    fn pin(&self, request: &ApiRequest) -> SessionPin {
        match &request.authorization {
            Authorization::Bearer(token) => SessionPin {
                generation: self.store.generation(),
                access_token: Some(token.clone()),
            },
            _ => self.store.pin(),
        }
    }
}

#[async_trait]
impl<H: RequestHandler> RequestHandler for RenewOnExpiry<H> {
    async fn handle(&self, request: ApiRequest) -> Result<RawResponse> {
        if request.authorization == Authorization::Anonymous {
            return self.inner.handle(request).await;
        }

        let pin = self.pin(&request);
        let first = match &pin.access_token {
            Some(token) => request.clone().with_bearer(token.clone()),
            None => request.clone(),
        };

        match self.inner.handle(first).await {
            Err(SessionError::SessionExpired { .. }) => {}
            other => return other,
        }

        debug!(path = %request.path, "Access token rejected, renewing");
        let token = match self.coordinator.refresh(&pin).await {
            Ok(token) => token,
            // 带着令牌发出的请求，其会话已经结束
            Err(SessionError::NoRefreshToken) => {
                return Err(SessionError::SessionExpired {
                    terminated: pin.access_token.is_some(),
                })
            }
            Err(e) => {
                warn!(path = %request.path, error = %e, "Session renewal failed");
                return Err(SessionError::SessionExpired { terminated: true });
            }
        };

        metrics::counter!("session_request_retries_total").increment(1);
        match self.inner.handle(request.with_bearer(token)).await {
            // 重试仍然过期：不再刷新，也不强制登出
            Err(SessionError::SessionExpired { .. }) => {
                warn!("Request rejected again after renewal");
                Err(SessionError::SessionExpired { terminated: false })
            }
            other => other,
        }
    }
}
