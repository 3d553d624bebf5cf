//! # Error Types
//!
//! Typed error handling for the storefront checkout engine.
//!
//! Three layers:
//! - `PaymentError` is what a payment gateway reports.
//! - `StoreError` is what a repository reports.
//! - `ShopError` is what every service operation returns, and what the HTTP
//!   layer maps to a status code.

use thiserror::Error;
use uuid::Uuid;

/// Errors reported by payment gateway implementations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid request data, detected before any network call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Currency not supported by the provider
    #[error("Unsupported currency: {currency}")]
    UnsupportedCurrency { currency: String },

    /// Operation not offered by this provider
    #[error("Operation not supported by {provider}: {operation}")]
    Unsupported { provider: String, operation: String },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Payment was declined
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// Rate limited by provider
    #[error("Rate limited by {provider}, retry after {retry_after_secs} seconds")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PaymentError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError(_)
                | PaymentError::RateLimited { .. }
                | PaymentError::ProviderError { .. }
        )
    }

    /// Returns true if the request never left the process
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PaymentError::InvalidRequest(_)
                | PaymentError::UnsupportedCurrency { .. }
                | PaymentError::Unsupported { .. }
                | PaymentError::Configuration(_)
        )
    }
}

/// Result type alias for gateway operations
pub type PaymentResult<T> = Result<T, PaymentError>;

/// Errors reported by repository implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or state precondition failed
    #[error("Storage conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: u32,
        available: u32,
    },

    /// Discount stopped being usable between apply and commit
    #[error("Discount unavailable: {0}")]
    DiscountUnavailable(DiscountRejection),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why a discount code was refused. Surfaced verbatim to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountRejection {
    #[error("discount code not found: {0}")]
    UnknownCode(String),
    #[error("discount code is not active")]
    Inactive,
    #[error("discount code is not valid yet")]
    NotStarted,
    #[error("discount code has expired")]
    Expired,
    #[error("discount usage limit reached")]
    UsageLimitReached,
    #[error("discount minimum order value not met")]
    MinimumOrderNotMet,
    #[error("discount does not apply to any item in the cart")]
    NotApplicable,
}

/// Core error type for all storefront operations
#[derive(Debug, Error)]
pub enum ShopError {
    /// Bad input shape or range, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation not allowed in the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Discount rejected: {0}")]
    DiscountRejected(#[from] DiscountRejection),

    #[error("Unsupported currency: {currency}")]
    UnsupportedCurrency { currency: String },

    /// Gateway failure on a privileged operation
    #[error(transparent)]
    Payment(PaymentError),

    /// Buyer-facing payment failure; provider details are logged, not returned
    #[error("payment failed")]
    PaymentFailed { order_id: Uuid },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(StoreError),
}

impl ShopError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ShopError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            ShopError::Payment(e) => e.is_retryable(),
            ShopError::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ShopError::Validation(_) => 400,
            ShopError::NotFound { .. } => 404,
            ShopError::Conflict(_) => 409,
            ShopError::DiscountRejected(DiscountRejection::UnknownCode(_)) => 404,
            ShopError::DiscountRejected(_) => 422,
            ShopError::UnsupportedCurrency { .. } => 400,
            ShopError::Payment(e) if e.is_rejection() => 400,
            ShopError::Payment(PaymentError::PaymentDeclined { .. }) => 402,
            ShopError::Payment(PaymentError::RateLimited { .. }) => 429,
            ShopError::Payment(_) => 502,
            ShopError::PaymentFailed { .. } => 402,
            ShopError::Authentication(_) => 401,
            ShopError::Forbidden(_) => 403,
            ShopError::Store(StoreError::NotFound { .. }) => 404,
            ShopError::Store(StoreError::Conflict(_)) => 409,
            ShopError::Store(StoreError::InsufficientStock { .. }) => 409,
            ShopError::Store(StoreError::DiscountUnavailable(_)) => 422,
            ShopError::Store(StoreError::Backend(_)) => 500,
        }
    }
}

impl From<StoreError> for ShopError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => ShopError::NotFound { entity, id },
            StoreError::Conflict(msg) => ShopError::Conflict(msg),
            StoreError::DiscountUnavailable(reason) => ShopError::DiscountRejected(reason),
            other => ShopError::Store(other),
        }
    }
}

impl From<PaymentError> for ShopError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::UnsupportedCurrency { currency } => {
                ShopError::UnsupportedCurrency { currency }
            }
            PaymentError::InvalidRequest(msg) => ShopError::Validation(msg),
            other => ShopError::Payment(other),
        }
    }
}

/// Result type alias for storefront operations
pub type ShopResult<T> = Result<T, ShopError>;
