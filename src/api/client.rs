//! HTTP client for the OneOrder collection endpoints.
//!
//! This module provides the [`Remote`] trait, the seam between the cache
//! manager and the backend, and [`HttpRemote`], its reqwest implementation
//! bound to one collection path (e.g. `internal-protocols`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::entity::Entity;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Bounded so a hung request cannot delay the local-store fallback for long.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Optional `{ success, data, message }` wrapper used by some endpoints.
/// Other endpoints answer with the bare payload and an HTTP status only;
/// [`decode`] tolerates both.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: Option<bool>,
    data: Option<T>,
    message: Option<String>,
}

/// Remote collection endpoint for one entity type.
///
/// Implementations must treat their own failures as recoverable: the cache
/// manager falls back to a local-only mutation on any error returned here.
#[async_trait]
pub trait Remote<E: Entity>: Send + Sync {
    async fn list(&self) -> Result<Vec<E>, ApiError>;

    /// Create an entity server-side; the returned copy carries the
    /// server-assigned id.
    async fn create(&self, entity: &E) -> Result<E, ApiError>;

    async fn update(&self, id: &str, entity: &E) -> Result<E, ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    /// Status-only toggle via `PATCH`.
    async fn set_status(&self, id: &str, active: bool) -> Result<(), ApiError>;
}

/// API client for one OneOrder collection endpoint.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    path: String,
}

impl HttpRemote {
    /// `base_url` is the API root (e.g. `http://localhost:8080/api`), `path`
    /// the collection segment (e.g. `internal-protocols`).
    pub fn new(base_url: impl Into<String>, path: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            path: path.into(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.path)
    }

    fn entity_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.path, id)
    }

    /// Return the body for 2xx responses, a status-mapped error otherwise.
    async fn read_body(response: reqwest::Response) -> Result<String, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.text().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

/// Unwrap a response body that may or may not use the
/// `{ success, data, message }` envelope. An explicit `success: false`
/// counts as failure even on a 2xx status.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    if let Ok(envelope) = serde_json::from_str::<ApiEnvelope<T>>(body) {
        if envelope.success == Some(false) {
            return Err(ApiError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        if let Some(data) = envelope.data {
            return Ok(data);
        }
    }

    serde_json::from_str(body)
        .map_err(|e| ApiError::InvalidResponse(format!("unexpected body shape: {}", e)))
}

/// Like [`decode`] but for responses whose payload we don't need; only the
/// envelope's `success` flag matters.
fn check_ack(body: &str) -> Result<(), ApiError> {
    if let Ok(envelope) = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body) {
        if envelope.success == Some(false) {
            return Err(ApiError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl<E: Entity> Remote<E> for HttpRemote {
    async fn list(&self) -> Result<Vec<E>, ApiError> {
        let response = self.client.get(self.collection_url()).send().await?;
        let body = Self::read_body(response).await?;
        decode(&body)
    }

    async fn create(&self, entity: &E) -> Result<E, ApiError> {
        let response = self
            .client
            .post(self.collection_url())
            .json(entity)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        decode(&body)
    }

    async fn update(&self, id: &str, entity: &E) -> Result<E, ApiError> {
        let response = self
            .client
            .put(self.entity_url(id))
            .json(entity)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        decode(&body)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let response = self.client.delete(self.entity_url(id)).send().await?;
        let body = Self::read_body(response).await?;
        check_ack(&body)
    }

    async fn set_status(&self, id: &str, active: bool) -> Result<(), ApiError> {
        let response = self
            .client
            .patch(self.entity_url(id))
            .json(&json!({ "active": active }))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        check_ack(&body)
    }
}

// ============================================================================
// Tests
// ============================================================================
