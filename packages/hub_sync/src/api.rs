//! Request/response collaborator.
//!
//! The engine only depends on the [`HubApi`] contract; [`HttpHubApi`] is the
//! production implementation against the hub's `/api/v1` routes.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::models::{Message, SendChatRequest, SendChatResponse, Session, SessionTokenUsage};

pub trait HubApi: Send + Sync {
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<Session>, ApiError>> + Send;

    fn list_messages(
        &self,
        session_id: i64,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Start a turn. `session_id` 0 asks the server to create the session.
    fn send_chat(
        &self,
        req: SendChatRequest<'_>,
    ) -> impl Future<Output = Result<SendChatResponse, ApiError>> + Send;

    fn delete_session(&self, session_id: i64) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Reset the backend context with a condensed summary of the conversation.
    fn compress_session(
        &self,
        session_id: i64,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn switch_provider(
        &self,
        session_id: i64,
        provider_id: &str,
    ) -> impl Future<Output = Result<Session, ApiError>> + Send;

    fn session_token_usage(
        &self,
        session_id: i64,
    ) -> impl Future<Output = Result<SessionTokenUsage, ApiError>> + Send;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct HttpHubApi {
    client: reqwest::Client,
    base: String,
}

impl HttpHubApi {
    pub fn new(config: &ServerConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ApiError::Http)?;
        Ok(Self {
            client,
            base: config.api_base(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await.map_err(ApiError::from_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        debug!(status = status.as_u16(), %message, "hub request failed");
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, ApiError> {
        self.execute(req)
            .await?
            .json::<T>()
            .await
            .map_err(ApiError::Http)
    }
}

impl HubApi for HttpHubApi {
    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.json(self.client.get(self.url("/sessions"))).await
    }

    async fn list_messages(&self, session_id: i64) -> Result<Vec<Message>, ApiError> {
        let url = self.url(&format!("/sessions/{session_id}/messages"));
        self.json(self.client.get(url)).await
    }

    async fn send_chat(&self, req: SendChatRequest<'_>) -> Result<SendChatResponse, ApiError> {
        self.json(self.client.post(self.url("/chat/send")).json(&req))
            .await
    }

    async fn delete_session(&self, session_id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("/sessions/{session_id}"));
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }

    async fn compress_session(&self, session_id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("/sessions/{session_id}/compress"));
        self.execute(self.client.post(url)).await?;
        Ok(())
    }

    async fn switch_provider(&self, session_id: i64, provider_id: &str) -> Result<Session, ApiError> {
        let url = self.url(&format!("/sessions/{session_id}"));
        let body = serde_json::json!({ "provider_id": provider_id });
        self.json(self.client.put(url).json(&body)).await
    }

    async fn session_token_usage(&self, session_id: i64) -> Result<SessionTokenUsage, ApiError> {
        let url = self.url(&format!("/token-usage/session/{session_id}"));
        self.json(self.client.get(url)).await
    }
}
