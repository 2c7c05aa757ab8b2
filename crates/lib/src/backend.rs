//! Backend API client (http://127.0.0.1:5000 by default).
//!
//! Two request/reply calls: `POST /message` for free-form text and control messages,
//! `POST /location` for shared locations. Both answer `{ "reply": "..." }`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Reserved message body: tells the backend to drop any conversation state for the sender.
pub const END_SESSION: &str = "end_session";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request timed out: {0}")]
    Timeout(String),
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
}

impl BackendError {
    fn from_send(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout(e.to_string())
        } else {
            BackendError::Request(e)
        }
    }
}

/// Calls the router makes against the conversational backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Forward a message (or the reserved `end_session` control value). Returns the reply text, empty when the backend gave none.
    async fn post_message(&self, sender: &str, message: &str) -> Result<String, BackendError>;

    /// Forward a shared location. Returns the reply text, empty when the backend gave none.
    async fn post_location(
        &self,
        sender: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    sender: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct LocationRequest<'a> {
    sender: &'a str,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ReplyResponse {
    #[serde(default)]
    reply: Option<String>,
}

/// HTTP client for the backend. Every request is bounded by the configured timeout.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<String, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(BackendError::from_send)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        let data: ReplyResponse = res.json().await.map_err(BackendError::from_send)?;
        Ok(data.reply.unwrap_or_default())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn post_message(&self, sender: &str, message: &str) -> Result<String, BackendError> {
        self.post("/message", &MessageRequest { sender, message }).await
    }

    async fn post_location(
        &self,
        sender: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<String, BackendError> {
        self.post(
            "/location",
            &LocationRequest {
                sender,
                latitude,
                longitude,
            },
        )
        .await
    }
}
