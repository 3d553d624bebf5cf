//! # Request Handlers
//!
//! Axum request handlers for the storefront API, split by audience:
//! buyer checkout, order reads, admin operations and provider webhooks.
//! Shared pieces (error responses, caller identity, the session cookie)
//! live here.

pub mod admin;
pub mod checkout;
pub mod orders;
pub mod webhooks;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use storefront_core::{Caller, PaymentError, ShopError, StoreError};
use tracing::error;

/// Name of the cookie binding a browser to its checkout
pub const SESSION_COOKIE: &str = "checkout_session_id";

/// Header set by the upstream authenticator
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

// =============================================================================
// Errors
// =============================================================================

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Handler error: a `ShopError` rendered as JSON with its mapped status
#[derive(Debug)]
pub struct ApiError(pub ShopError);

impl<E: Into<ShopError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let code = err.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = match &err {
            // Provider details stay in the logs
            ShopError::PaymentFailed { order_id } => {
                ErrorResponse::new("payment failed", code).with_details(order_id.to_string())
            }
            ShopError::Store(StoreError::Backend(message)) => {
                error!(error = %message, "Storage failure");
                ErrorResponse::new("internal error", code)
            }
            ShopError::Payment(PaymentError::ProviderError { .. } | PaymentError::NetworkError(_)) => {
                error!(error = %err, "Provider call failed");
                ErrorResponse::new("payment provider unavailable", code)
            }
            other => ErrorResponse::new(other.to_string(), code),
        };
        body.retryable = err.is_retryable();

        let mut response = (status, Json(body)).into_response();
        if let ShopError::Payment(PaymentError::RateLimited {
            retry_after_secs, ..
        }) = &err
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// =============================================================================
// Caller identity
// =============================================================================

/// Who is calling. Built from the authenticator headers and the session
/// cookie; never rejects, anonymous callers simply carry nothing.
#[derive(Debug, Clone, Default)]
pub struct Identity(pub Caller);

impl Identity {
    pub fn session_id(&self) -> Option<&str> {
        self.0.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.0.user_id.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let user_id = header_str(headers, USER_ID_HEADER)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let is_admin = header_str(headers, USER_ROLE_HEADER)
            .map(|role| role.split(',').any(|r| r.trim().eq_ignore_ascii_case("admin")))
            .unwrap_or(false);

        Ok(Identity(Caller {
            user_id,
            is_admin,
            session_id: session_cookie(headers),
        }))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Value of the checkout session cookie, if sent
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value binding the browser to a checkout session
pub fn session_set_cookie(session_id: &str, secure: bool) -> Option<HeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

// =============================================================================
// Health
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storefront",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_identity_from_headers_and_cookie() {
        let mut parts = parts(&[
            ("x-user-id", "user-7"),
            ("x-user-role", "staff, Admin"),
            ("cookie", "theme=dark; checkout_session_id=abc-123"),
        ]);
        let Identity(caller) = Identity::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(caller.user_id.as_deref(), Some("user-7"));
        assert!(caller.is_admin);
        assert_eq!(caller.session_id.as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_anonymous_identity() {
        let mut parts = parts(&[("cookie", "checkout_session_id=")]);
        let Identity(caller) = Identity::from_request_parts(&mut parts, &()).await.unwrap();

        assert!(caller.user_id.is_none());
        assert!(!caller.is_admin);
        assert!(caller.session_id.is_none());
    }

    #[test]
    fn test_set_cookie_flags() {
        let value = session_set_cookie("abc", true).unwrap();
        let value = value.to_str().unwrap();
        assert!(value.starts_with("checkout_session_id=abc"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.ends_with("; Secure"));
    }

    #[test]
    fn test_payment_failure_is_generic() {
        let order_id = uuid::Uuid::new_v4();
        let response = ApiError(ShopError::PaymentFailed { order_id }).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError(ShopError::Payment(PaymentError::RateLimited {
            provider: "stripe".to_string(),
            retry_after_secs: 7,
        }))
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }
}
