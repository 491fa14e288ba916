//! HTTP 传输：请求/响应类型与基于 reqwest 的客户端

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::{Result, SessionError};
use crate::models::ApiEnvelope;

/// 请求携带的凭据
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    /// 发送时凭据存储中的访问令牌
    Session,
    /// 指定令牌
    Bearer(String),
    /// 不带凭据
    Anonymous,
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Session => f.write_str("Session"),
            Authorization::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Authorization::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// 发出的 API 请求
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub authorization: Authorization,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authorization: Authorization::Session,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.authorization = Authorization::Anonymous;
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.authorization = Authorization::Bearer(token.into());
        self
    }

    /// 请求显式携带的令牌
    pub fn bearer(&self) -> Option<&str> {
        match &self.authorization {
            Authorization::Bearer(token) => Some(token.as_str()),
            _ => None,
        }
    }
}

/// 原始响应：状态码与响应体文本
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| SessionError::MalformedResponse(e.to_string()))
    }

    pub fn envelope<T: DeserializeOwned>(&self) -> Result<ApiEnvelope<T>> {
        self.json()
    }

    /// 取出响应包装中的 `data`
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let envelope = self.envelope::<T>()?;
        if !envelope.success {
            return Err(SessionError::Api {
                status: self.status,
                message: envelope
                    .describe()
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            });
        }
        envelope
            .data
            .ok_or_else(|| SessionError::MalformedResponse("response envelope has no data".into()))
    }

    /// 响应包装中服务端给出的消息
    pub fn message(&self) -> Option<String> {
        serde_json::from_str::<ApiEnvelope<Value>>(&self.body)
            .ok()
            .and_then(|envelope| envelope.describe())
    }

    pub fn error_message(&self) -> String {
        self.message()
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// 向远端 API 发送请求
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// 以 `bearer` 为凭据发送 `request`。只有传输失败算错误，任何 HTTP 状态都作为响应返回
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<RawResponse>;
}

/// 基于 reqwest 的传输
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SessionError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn build_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<RawResponse> {
        let url = self.build_url(&request.path);
        let request_id = Uuid::new_v4().to_string();

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header("Accept", "application/json")
            .header("X-Request-Id", &request_id);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        debug!(
            method = %request.method,
            path = %request.path,
            status,
            request_id = %request_id,
            "API response received"
        );

        Ok(RawResponse { status, body })
    }
}
