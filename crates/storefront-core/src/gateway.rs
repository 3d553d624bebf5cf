//! # Payment Gateway Trait
//!
//! Capability trait over payment providers. Implementations live in
//! `storefront-gateways`: Stripe (card, immediate capture), MobilePay
//! (wallet redirect) and a mock for tests and local development.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentGateway (trait)                   │
//! │  ├── validate_request()      (before any network call)      │
//! │  ├── process_payment()       → terminal | requires_action   │
//! │  ├── verify_payment()                                       │
//! │  ├── capture_payment() / refund_payment() / cancel_payment()│
//! │  └── force_approve()         (sandbox only)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!          ┌─────────────────┼─────────────────┐
//!  ┌───────┴───────┐ ┌───────┴───────┐ ┌───────┴───────┐
//!  │ StripeGateway │ │MobilePayGatewy│ │  MockGateway  │
//!  └───────────────┘ └───────────────┘ └───────────────┘
//! ```
//!
//! Providers are a closed enum; `PaymentGateways` maps each enabled provider
//! to its trait object.

use crate::error::{PaymentError, PaymentResult};
use crate::money::normalize_code;
use crate::order::PaymentStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Payment providers known to the storefront
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    MobilePay,
    Mock,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::MobilePay => "mobilepay",
            PaymentProvider::Mock => "mock",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stripe" => Ok(PaymentProvider::Stripe),
            "mobilepay" => Ok(PaymentProvider::MobilePay),
            "mock" => Ok(PaymentProvider::Mock),
            other => Err(PaymentError::InvalidRequest(format!(
                "unknown payment provider: {other}"
            ))),
        }
    }
}

/// How the buyer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

/// Card data as submitted at checkout. Either a provider token or raw
/// number/expiry/CVV.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CardDetails {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub exp_month: Option<u32>,
    #[serde(default)]
    pub exp_year: Option<u32>,
    #[serde(default)]
    pub cvv: Option<String>,
}

// Never print card data
impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("number", &self.number.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything a gateway needs to start a payment
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub card: Option<CardDetails>,
    pub phone_number: Option<String>,
    pub customer_email: Option<String>,
    /// Where a redirect flow returns the buyer to
    pub return_url: Option<String>,
    pub description: String,
    /// Sent to the provider so a retried call cannot double-charge
    pub idempotency_key: String,
}

/// Result of `process_payment`
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    /// Provider payment id; orders are found by it when webhooks arrive
    pub payment_id: String,
    /// `Authorized` or `Captured` when terminal, `Pending` when an action is required
    pub status: PaymentStatus,
    pub requires_action: bool,
    pub action_url: Option<String>,
    pub raw: serde_json::Value,
}

impl PaymentOutcome {
    pub fn is_terminal_success(&self) -> bool {
        !self.requires_action
            && matches!(
                self.status,
                PaymentStatus::Authorized | PaymentStatus::Captured
            )
    }
}

/// Amount-bearing follow-up operation on an existing payment
#[derive(Debug, Clone)]
pub struct PaymentAdjustment {
    pub payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: String,
}

/// Provider acknowledgement of a capture, refund or cancel
#[derive(Debug, Clone)]
pub struct GatewayReceipt {
    /// Provider id of the operation (refund id, or the payment id itself)
    pub transaction_id: String,
    pub amount: i64,
    pub raw: serde_json::Value,
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// ISO 4217 codes the provider accepts
    fn supported_currencies(&self) -> Vec<String>;

    fn supported_methods(&self) -> Vec<PaymentMethod>;

    fn supports_currency(&self, currency: &str) -> bool {
        let code = normalize_code(currency);
        self.supported_currencies().iter().any(|c| *c == code)
    }

    /// Reject a request that cannot succeed, before any network call.
    ///
    /// Implementations that add checks should call [`check_common`] first.
    fn validate_request(&self, request: &PaymentRequest) -> PaymentResult<()> {
        check_common(self, request)
    }

    /// Start a payment. A pending outcome with `requires_action` means the
    /// buyer must complete it elsewhere and a webhook will follow.
    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome>;

    /// Ask the provider for the current state of a payment
    async fn verify_payment(&self, payment_id: &str) -> PaymentResult<PaymentOutcome>;

    async fn capture_payment(&self, adjustment: &PaymentAdjustment)
        -> PaymentResult<GatewayReceipt>;

    async fn refund_payment(&self, adjustment: &PaymentAdjustment)
        -> PaymentResult<GatewayReceipt>;

    async fn cancel_payment(&self, adjustment: &PaymentAdjustment)
        -> PaymentResult<GatewayReceipt>;

    /// Approve a pending payment without the buyer (test environments only)
    async fn force_approve(&self, _payment_id: &str) -> PaymentResult<()> {
        Err(PaymentError::Unsupported {
            provider: self.provider().to_string(),
            operation: "force_approve".to_string(),
        })
    }
}

/// Checks shared by every provider: positive amount, currency and method support
pub fn check_common<G: PaymentGateway + ?Sized>(
    gateway: &G,
    request: &PaymentRequest,
) -> PaymentResult<()> {
    if request.amount <= 0 {
        return Err(PaymentError::InvalidRequest(
            "payment amount must be positive".to_string(),
        ));
    }
    if !gateway.supports_currency(&request.currency) {
        return Err(PaymentError::UnsupportedCurrency {
            currency: normalize_code(&request.currency),
        });
    }
    if !gateway.supported_methods().contains(&request.method) {
        return Err(PaymentError::InvalidRequest(format!(
            "{} does not accept {} payments",
            gateway.provider(),
            request.method.as_str()
        )));
    }
    Ok(())
}

/// Type alias for a shared gateway (dynamic dispatch)
pub type BoxedPaymentGateway = Arc<dyn PaymentGateway>;

/// Registry of enabled gateways
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentProvider, BoxedPaymentGateway>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its provider
    pub fn register(&mut self, gateway: BoxedPaymentGateway) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    /// Register with builder pattern
    pub fn with_gateway(mut self, gateway: BoxedPaymentGateway) -> Self {
        self.register(gateway);
        self
    }

    /// Gateway for an enabled provider
    pub fn get(&self, provider: PaymentProvider) -> PaymentResult<&BoxedPaymentGateway> {
        self.gateways
            .get(&provider)
            .ok_or_else(|| PaymentError::InvalidRequest(format!(
                "payment provider {provider} is not enabled"
            )))
    }

    pub fn is_enabled(&self, provider: PaymentProvider) -> bool {
        self.gateways.contains_key(&provider)
    }

    /// List enabled providers
    pub fn providers(&self) -> Vec<PaymentProvider> {
        let mut providers: Vec<_> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

impl std::fmt::Debug for PaymentGateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateways")
            .field("providers", &self.providers())
            .finish()
    }
}
