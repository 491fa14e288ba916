//! 请求分发：附加凭据并对响应分类

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::pipeline::RequestHandler;
use crate::store::CredentialStore;
use crate::transport::{ApiRequest, Authorization, HttpTransport, RawResponse};

/// HTTP 状态的结果类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// 401：访问令牌缺失、过期或无效
    Expired,
    /// 403：已认证但无权限，从不触发续期
    Forbidden,
    Failure,
}

impl ResponseClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => ResponseClass::Success,
            401 => ResponseClass::Expired,
            403 => ResponseClass::Forbidden,
            _ => ResponseClass::Failure,
        }
    }
}

/// 以当前凭据发送请求，从不修改存储
pub struct RequestDispatcher {
    transport: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, store: Arc<CredentialStore>) -> Self {
        Self { transport, store }
    }

    fn bearer_for(&self, request: &ApiRequest) -> Option<String> {
        match &request.authorization {
            Authorization::Session => self.store.access_token(),
            Authorization::Bearer(token) => Some(token.clone()),
            Authorization::Anonymous => None,
        }
    }
}

#[async_trait]
impl RequestHandler for RequestDispatcher {
    async fn handle(&self, request: ApiRequest) -> Result<RawResponse> {
        let bearer = self.bearer_for(&request);
        let response = self.transport.send(&request, bearer.as_deref()).await?;

        match ResponseClass::from_status(response.status) {
            ResponseClass::Success => Ok(response),
            ResponseClass::Expired => {
                debug!(path = %request.path, "Request rejected as unauthenticated");
                Err(SessionError::SessionExpired { terminated: false })
            }
            ResponseClass::Forbidden => Err(SessionError::Forbidden),
            ResponseClass::Failure => Err(SessionError::Api {
                status: response.status,
                message: response.error_message(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credential, Role, SessionUser};
    use std::sync::Mutex;

    /// 返回固定状态码并记录收到的令牌
    struct FixedStatus {
        status: u16,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl FixedStatus {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for FixedStatus {
        async fn send(&self, _request: &ApiRequest, bearer: Option<&str>) -> Result<RawResponse> {
            self.seen.lock().unwrap().push(bearer.map(str::to_string));
            Ok(RawResponse::new(
                self.status,
                r#"{"success":false,"message":"upstream says no"}"#,
            ))
        }
    }

    fn store_with_session() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::in_memory());
        store.set_session(
            &Credential::new("a1", "r1"),
            &SessionUser::new(1, "kim", Role::Student),
        );
        store
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ResponseClass::from_status(200), ResponseClass::Success);
        assert_eq!(ResponseClass::from_status(204), ResponseClass::Success);
        assert_eq!(ResponseClass::from_status(401), ResponseClass::Expired);
        assert_eq!(ResponseClass::from_status(403), ResponseClass::Forbidden);
        assert_eq!(ResponseClass::from_status(404), ResponseClass::Failure);
        assert_eq!(ResponseClass::from_status(500), ResponseClass::Failure);
    }

    #[tokio::test]
    async fn test_attaches_current_access_token() {
        let transport = FixedStatus::new(200);
        let dispatcher = RequestDispatcher::new(transport.clone(), store_with_session());

        dispatcher.handle(ApiRequest::get("/courses")).await.unwrap();
        dispatcher
            .handle(ApiRequest::get("/public").anonymous())
            .await
            .unwrap();
        dispatcher
            .handle(ApiRequest::get("/courses").with_bearer("pinned"))
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![Some("a1".to_string()), None, Some("pinned".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_is_expired_and_store_untouched() {
        let store = store_with_session();
        let dispatcher = RequestDispatcher::new(FixedStatus::new(401), store.clone());

        let result = dispatcher.handle(ApiRequest::get("/courses")).await;
        assert_eq!(
            result.unwrap_err(),
            SessionError::SessionExpired { terminated: false }
        );
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_forbidden_and_other_failures() {
        let dispatcher = RequestDispatcher::new(FixedStatus::new(403), store_with_session());
        assert_eq!(
            dispatcher.handle(ApiRequest::get("/admin")).await.unwrap_err(),
            SessionError::Forbidden
        );

        let dispatcher = RequestDispatcher::new(FixedStatus::new(500), store_with_session());
        assert_eq!(
            dispatcher.handle(ApiRequest::get("/courses")).await.unwrap_err(),
            SessionError::Api {
                status: 500,
                message: "upstream says no".to_string()
            }
        );
    }
}
