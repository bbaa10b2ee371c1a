//! REST client for the ProdSight backend.
//!
//! Every endpoint answers with the `{ success, data, message? }` envelope.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{Budget, Role, Script, ScriptMetrics, Task, User};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: Unable to connect to server")]
    Network(String),
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("{0}")]
    Unsuccessful(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request timeout: {0}")]
    Timeout(String),
}

impl ApiError {
    /// HTTP status, or 0 when the server could not be reached.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Http { status, .. } => *status,
            _ => 0,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        if value.is_decode() {
            return Self::InvalidResponse(value.to_string());
        }
        Self::Network(value.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `endpoint` and return the full envelope.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "GET");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| "Request failed".to_string());
            warn!(url = %url, status = status.as_u16(), "request failed: {}", message);
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<ApiResponse<T>>().await?)
    }

    /// GET `endpoint` and unwrap `data`, treating `success: false` as an error.
    pub async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let envelope = self.get::<T>(endpoint).await?;
        if !envelope.success {
            return Err(ApiError::Unsuccessful(
                envelope.message.unwrap_or_else(|| "Request failed".to_string()),
            ));
        }
        Ok(envelope.data)
    }
}
