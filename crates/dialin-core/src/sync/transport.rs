//! Transport seam between the sync coordinator and the sync server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use super::wire::{PullResponse, PushRequest, PushResponse};
use crate::config::ClientConfig;
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Sync request was not authorized")]
    Unauthorized,
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// One request/response exchange per call; no retries.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Confirm the current credentials are accepted.
    async fn check_auth(&self) -> TransportResult<()>;

    /// Fetch changes after `since` (full sync when `None`).
    async fn pull(&self, since: Option<i64>) -> TransportResult<PullResponse>;

    /// Send locally dirty records.
    async fn push(&self, request: &PushRequest) -> TransportResult<PushResponse>;
}

/// `reqwest`-backed transport talking to the Dial-In sync API.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("auth_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let auth_token = normalize_text_option(Some(auth_token.into())).ok_or_else(|| {
            TransportError::InvalidConfiguration("auth token must not be empty".to_string())
        })?;

        Ok(Self {
            base_url,
            auth_token,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Build a transport from client configuration.
    pub fn from_config(config: &ClientConfig) -> TransportResult<Self> {
        let base_url = config.api_url.clone().ok_or_else(|| {
            TransportError::InvalidConfiguration("DIALIN_API_URL is not set".to_string())
        })?;
        let auth_token = config.auth_token.clone().ok_or_else(|| {
            TransportError::InvalidConfiguration("DIALIN_AUTH_TOKEN is not set".to_string())
        })?;
        Self::new(base_url, auth_token, config.http_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> TransportResult<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|error| TransportError::InvalidPayload(format!("{error}: {}", compact_text(&body))))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn check_auth(&self) -> TransportResult<()> {
        let response = self
            .client
            .head(self.url("/sync/pull"))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Unauthorized),
            status if status.is_success() => Ok(()),
            status => Err(TransportError::Api(parse_api_error(status, ""))),
        }
    }

    async fn pull(&self, since: Option<i64>) -> TransportResult<PullResponse> {
        let mut request = self
            .client
            .get(self.url("/sync/pull"))
            .bearer_auth(&self.auth_token)
            .header("Accept", "application/json");
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }

        let payload: PullResponse = Self::decode(request.send().await?).await?;
        if !payload.success {
            return Err(TransportError::Api("pull was not successful".to_string()));
        }
        Ok(payload)
    }

    async fn push(&self, request: &PushRequest) -> TransportResult<PushResponse> {
        let response = self
            .client
            .post(self.url("/sync/push"))
            .bearer_auth(&self.auth_token)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await?;

        let payload: PushResponse = Self::decode(response).await?;
        if !payload.success {
            return Err(TransportError::Api("push was not successful".to_string()));
        }
        Ok(payload)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> TransportResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("API URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}
