//! HTTP client for the control plane.
//!
//! Used by the `sflow` client subcommands and by producers running outside the serving
//! process. Configuration is via environment variables:
//! - `STAGEFLOW_URL` - Base URL (default: `http://127.0.0.1:5001`)

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::types::*;

/// Default URL for a local control plane.
pub const DEFAULT_URL: &str = "http://127.0.0.1:5001";

/// Timeout applied to every request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    client: Client,
}

impl ControlPlaneClient {
    /// Create client from environment variables.
    pub fn from_env() -> Self {
        let base_url = std::env::var("STAGEFLOW_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        Self::new(base_url)
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, &url)
    }

    /// Handle response, converting HTTP errors to ClientError.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            match status {
                StatusCode::NOT_FOUND => Err(ClientError::NotFound(body)),
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    Err(ClientError::BadRequest(body))
                }
                StatusCode::CONFLICT => Err(ClientError::Conflict(body)),
                _ => Err(ClientError::Server(format!("{}: {}", status, body))),
            }
        }
    }

    // ============================================================
    // Relay
    // ============================================================

    /// Relay `text` into a session's backing host.
    pub async fn relay(
        &self,
        session_number: u32,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<RelayResponse, ClientError> {
        let body = RelayRequest {
            session_number,
            text: text.to_string(),
            thread_id: thread_id.map(str::to_string),
        };
        let response = self
            .request(reqwest::Method::POST, "/relay")
            .json(&body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Sessions
    // ============================================================

    pub async fn register_session(
        &self,
        input: &RegisterSessionRequest,
    ) -> Result<RegisterSessionResponse, ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/session/register")
            .json(input)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_session(&self, session_number: u32) -> Result<SessionDetail, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/session/{}", session_number),
            )
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn session_by_thread(&self, thread_id: &str) -> Result<SessionDetail, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/session/by-thread/{}", thread_id),
            )
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn list_sessions(&self) -> Result<SessionList, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/sessions")
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Health
    // ============================================================

    pub async fn health(&self) -> Result<Health, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/health")
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn status(&self) -> Result<Status, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/status")
            .send()
            .await?;
        self.handle_response(response).await
    }
}
