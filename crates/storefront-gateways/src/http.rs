//! Shared plumbing for provider HTTP calls.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use storefront_core::{PaymentError, PaymentResult};
use tracing::error;

/// Client with a request-level timeout. Calls are never retried.
pub(crate) fn build_client(timeout: Duration) -> PaymentResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::Configuration(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn network(e: reqwest::Error) -> PaymentError {
    PaymentError::NetworkError(e.to_string())
}

/// A non-2xx response, body already read
pub(crate) struct Failure {
    pub status: StatusCode,
    pub body: String,
    pub retry_after: Option<u64>,
}

impl Failure {
    /// Rate limits become `RateLimited`, everything else a provider error
    /// carrying `message` (or the raw body).
    pub fn into_error(self, provider: &str, message: Option<String>) -> PaymentError {
        if self.status == StatusCode::TOO_MANY_REQUESTS {
            return PaymentError::RateLimited {
                provider: provider.to_string(),
                retry_after_secs: self.retry_after.unwrap_or(1),
            };
        }
        PaymentError::ProviderError {
            provider: provider.to_string(),
            message: message.unwrap_or_else(|| format!("HTTP {}: {}", self.status, self.body)),
        }
    }
}

/// Read a response as `T`, or hand back the failure for provider-specific
/// error decoding.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &str,
    response: Response,
) -> PaymentResult<Result<(T, serde_json::Value), Failure>> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let body = response.text().await.map_err(network)?;

    if !status.is_success() {
        error!(provider, %status, body = %body, "Provider API error");
        return Ok(Err(Failure {
            status,
            body,
            retry_after,
        }));
    }

    let raw: serde_json::Value = if body.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse {provider} response: {e}"))
        })?
    };
    let parsed = serde_json::from_value(raw.clone()).map_err(|e| {
        PaymentError::Serialization(format!("Failed to parse {provider} response: {e}"))
    })?;
    Ok(Ok((parsed, raw)))
}
