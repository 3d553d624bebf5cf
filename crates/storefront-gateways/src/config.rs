//! # Gateway Configuration
//!
//! Provider credentials, loaded from environment variables (and `.env` when
//! present). A provider whose primary key is unset is simply not enabled.

use std::env;
use std::time::Duration;
use storefront_core::PaymentError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, PaymentError> {
    var(name).ok_or_else(|| PaymentError::Configuration(format!("{name} not set")))
}

fn timeout_from_env(name: &str) -> Duration {
    let secs = var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Webhook signing secret (whsec_...). Without it webhooks are accepted
    /// unsigned, which is only sensible in local development.
    pub webhook_secret: Option<String>,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `STRIPE_SECRET_KEY` is unset.
    ///
    /// Env vars:
    /// - `STRIPE_SECRET_KEY`
    /// - `STRIPE_WEBHOOK_SECRET` (optional)
    /// - `STRIPE_API_BASE_URL` (optional)
    /// - `STRIPE_TIMEOUT_SECS` (optional)
    pub fn from_env() -> Result<Option<Self>, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let Some(secret_key) = var("STRIPE_SECRET_KEY") else {
            return Ok(None);
        };

        if !secret_key.starts_with("sk_test_") && !secret_key.starts_with("sk_live_") {
            return Err(PaymentError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        let webhook_secret = var("STRIPE_WEBHOOK_SECRET");
        if let Some(secret) = &webhook_secret {
            if !secret.starts_with("whsec_") {
                return Err(PaymentError::Configuration(
                    "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
                ));
            }
        }

        let mut config = Self::new(secret_key);
        config.webhook_secret = webhook_secret;
        config.timeout = timeout_from_env("STRIPE_TIMEOUT_SECS");
        if let Some(url) = var("STRIPE_API_BASE_URL") {
            config.api_base_url = url;
        }
        Ok(Some(config))
    }

    /// Create config with explicit values (for testing)
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: None,
            api_base_url: "https://api.stripe.com".to_string(),
            api_version: "2024-12-18.acacia".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Builder: set the webhook signing secret
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}

/// MobilePay ePayment API configuration
#[derive(Debug, Clone)]
pub struct MobilePayConfig {
    pub client_id: String,
    pub client_secret: String,
    /// `Ocp-Apim-Subscription-Key` header value
    pub subscription_key: String,
    pub merchant_serial_number: String,
    /// Shared secret for webhook HMAC signatures
    pub webhook_secret: Option<String>,
    /// Where the wallet sends the buyer after approval when the request has
    /// no return URL of its own
    pub default_return_url: String,
    pub api_base_url: String,
    /// Sandbox credentials; enables force-approve
    pub test_mode: bool,
    pub timeout: Duration,
}

impl MobilePayConfig {
    pub const TEST_BASE_URL: &'static str = "https://apitest.vipps.no";
    pub const LIVE_BASE_URL: &'static str = "https://api.vipps.no";

    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `MOBILEPAY_CLIENT_ID` is unset. Once it is set
    /// the remaining credentials are required.
    pub fn from_env() -> Result<Option<Self>, PaymentError> {
        dotenvy::dotenv().ok();

        let Some(client_id) = var("MOBILEPAY_CLIENT_ID") else {
            return Ok(None);
        };

        let test_mode = var("MOBILEPAY_TEST_MODE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(true);

        let mut config = Self::new(
            client_id,
            required("MOBILEPAY_CLIENT_SECRET")?,
            required("MOBILEPAY_SUBSCRIPTION_KEY")?,
            required("MOBILEPAY_MERCHANT_SERIAL_NUMBER")?,
            test_mode,
        );
        config.webhook_secret = var("MOBILEPAY_WEBHOOK_SECRET");
        config.timeout = timeout_from_env("MOBILEPAY_TIMEOUT_SECS");
        if let Some(url) = var("MOBILEPAY_RETURN_URL") {
            config.default_return_url = url;
        }
        if let Some(url) = var("MOBILEPAY_API_BASE_URL") {
            config.api_base_url = url;
        }
        Ok(Some(config))
    }

    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        subscription_key: impl Into<String>,
        merchant_serial_number: impl Into<String>,
        test_mode: bool,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            subscription_key: subscription_key.into(),
            merchant_serial_number: merchant_serial_number.into(),
            webhook_secret: None,
            default_return_url: "http://localhost:8080/checkout/return".to_string(),
            api_base_url: if test_mode {
                Self::TEST_BASE_URL
            } else {
                Self::LIVE_BASE_URL
            }
            .to_string(),
            test_mode,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_modes() {
        let config = StripeConfig::new("sk_test_abc123");
        assert!(config.is_test_mode());
        assert_eq!(config.auth_header(), "Bearer sk_test_abc123");
        assert!(config.webhook_secret.is_none());

        let config = StripeConfig::new("sk_live_abc123").with_webhook_secret("whsec_x");
        assert!(!config.is_test_mode());
        assert_eq!(config.webhook_secret.as_deref(), Some("whsec_x"));
    }

    #[test]
    fn test_mobilepay_base_url_follows_mode() {
        let test = MobilePayConfig::new("id", "secret", "sub", "123456", true);
        assert_eq!(test.api_base_url, MobilePayConfig::TEST_BASE_URL);

        let live = MobilePayConfig::new("id", "secret", "sub", "123456", false);
        assert_eq!(live.api_base_url, MobilePayConfig::LIVE_BASE_URL);
    }
}
