//! # Stripe Payment Intents
//!
//! Card payments through the Payment Intents API. Intents are confirmed
//! immediately with automatic capture; a card that needs 3-D Secure comes
//! back as `requires_action` with a redirect URL.

use crate::config::StripeConfig;
use crate::http::{build_client, network, read_json, Failure};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Client;
use serde::Deserialize;
use storefront_core::gateway::check_common;
use storefront_core::{
    CardDetails, GatewayReceipt, PaymentAdjustment, PaymentError, PaymentGateway, PaymentMethod,
    PaymentOutcome, PaymentProvider, PaymentRequest, PaymentResult, PaymentStatus,
};
use tracing::{debug, info, instrument};

const PROVIDER: &str = "stripe";

const CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "DKK", "SEK", "NOK", "CHF", "CAD", "AUD", "JPY",
];

/// Stripe card gateway
pub struct StripeGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: &str,
    ) -> PaymentResult<(T, serde_json::Value)> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await
            .map_err(network)?;
        read_json(PROVIDER, response).await?.map_err(stripe_error)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> PaymentResult<(T, serde_json::Value)> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .map_err(network)?;
        read_json(PROVIDER, response).await?.map_err(stripe_error)
    }
}

/// Card errors are declines; everything else is a provider error
fn stripe_error(failure: Failure) -> PaymentError {
    let parsed = serde_json::from_str::<StripeErrorResponse>(&failure.body).ok();
    match parsed {
        Some(StripeErrorResponse { error }) if error.error_type.as_deref() == Some("card_error") => {
            PaymentError::PaymentDeclined {
                reason: error.decline_code.or(error.code).unwrap_or(error.message),
            }
        }
        Some(StripeErrorResponse { error }) => failure.into_error(PROVIDER, Some(error.message)),
        None => failure.into_error(PROVIDER, None),
    }
}

/// Card sanity checks that need no network call
pub fn validate_card(card: Option<&CardDetails>) -> PaymentResult<()> {
    let card = card.ok_or_else(|| PaymentError::InvalidRequest("card details required".to_string()))?;
    if card.token.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        return Ok(());
    }

    let number: String = card
        .number
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if number.is_empty() {
        return Err(PaymentError::InvalidRequest(
            "card number or token required".to_string(),
        ));
    }
    if !(12..=19).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::InvalidRequest("invalid card number".to_string()));
    }

    match card.cvv.as_deref() {
        Some(cvv) if (3..=4).contains(&cvv.len()) && cvv.chars().all(|c| c.is_ascii_digit()) => {}
        _ => return Err(PaymentError::InvalidRequest("invalid CVV".to_string())),
    }

    let (Some(month), Some(year)) = (card.exp_month, card.exp_year) else {
        return Err(PaymentError::InvalidRequest("card expiry required".to_string()));
    };
    if !(1..=12).contains(&month) {
        return Err(PaymentError::InvalidRequest("invalid expiry month".to_string()));
    }
    let year = if year < 100 { year + 2000 } else { year };
    let today = Utc::now();
    let (this_year, this_month) = (today.year() as u32, today.month());
    if year < this_year || (year == this_year && month < this_month) {
        return Err(PaymentError::InvalidRequest("card has expired".to_string()));
    }
    Ok(())
}

/// Payment status for a Payment Intent status string
fn intent_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Captured,
        "requires_capture" => PaymentStatus::Authorized,
        "canceled" => PaymentStatus::Cancelled,
        "requires_payment_method" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

impl PaymentIntent {
    fn into_outcome(self, raw: serde_json::Value) -> PaymentOutcome {
        let status = intent_status(&self.status);
        let action_url = self
            .next_action
            .and_then(|a| a.redirect_to_url)
            .map(|r| r.url);
        PaymentOutcome {
            payment_id: self.id,
            requires_action: status == PaymentStatus::Pending,
            status,
            action_url,
            raw,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn supported_currencies(&self) -> Vec<String> {
        CURRENCIES.iter().map(|c| c.to_string()).collect()
    }

    fn supported_methods(&self) -> Vec<PaymentMethod> {
        vec![PaymentMethod::Card]
    }

    fn validate_request(&self, request: &PaymentRequest) -> PaymentResult<()> {
        check_common(self, request)?;
        validate_card(request.card.as_ref())
    }

    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        self.validate_request(request)?;

        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), request.amount.to_string()),
            ("currency".into(), request.currency.to_lowercase()),
            ("confirm".into(), "true".into()),
            ("capture_method".into(), "automatic".into()),
            ("description".into(), request.description.clone()),
            ("metadata[order_id]".into(), request.order_id.to_string()),
            ("metadata[order_number]".into(), request.order_number.clone()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("receipt_email".into(), email.clone()));
        }
        if let Some(url) = &request.return_url {
            form.push(("return_url".into(), url.clone()));
        }
        if let Some(card) = &request.card {
            match &card.token {
                Some(token) => form.push(("payment_method".into(), token.clone())),
                None => {
                    form.push(("payment_method_data[type]".into(), "card".into()));
                    let fields = [
                        ("number", card.number.clone()),
                        ("exp_month", card.exp_month.map(|m| m.to_string())),
                        ("exp_year", card.exp_year.map(|y| y.to_string())),
                        ("cvc", card.cvv.clone()),
                    ];
                    for (name, value) in fields {
                        if let Some(value) = value {
                            form.push((format!("payment_method_data[card][{name}]"), value));
                        }
                    }
                }
            }
        }

        debug!(amount = request.amount, currency = %request.currency, "Creating Stripe payment intent");
        let (intent, raw): (PaymentIntent, _) = self
            .post_form("/v1/payment_intents", &form, &request.idempotency_key)
            .await?;

        if intent.status == "requires_payment_method" {
            let reason = intent
                .last_payment_error
                .map(|e| e.message)
                .unwrap_or_else(|| "payment method declined".to_string());
            return Err(PaymentError::PaymentDeclined { reason });
        }

        info!(payment_intent = %intent.id, status = %intent.status, "Created Stripe payment intent");
        Ok(intent.into_outcome(raw))
    }

    async fn verify_payment(&self, payment_id: &str) -> PaymentResult<PaymentOutcome> {
        let (intent, raw): (PaymentIntent, _) =
            self.get(&format!("/v1/payment_intents/{payment_id}")).await?;
        Ok(intent.into_outcome(raw))
    }

    #[instrument(skip(self, adjustment), fields(payment_id = %adjustment.payment_id))]
    async fn capture_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        let form = vec![("amount_to_capture".to_string(), adjustment.amount.to_string())];
        let (intent, raw): (PaymentIntent, _) = self
            .post_form(
                &format!("/v1/payment_intents/{}/capture", adjustment.payment_id),
                &form,
                &adjustment.idempotency_key,
            )
            .await?;
        Ok(GatewayReceipt {
            amount: intent.amount_received.unwrap_or(adjustment.amount),
            transaction_id: intent.latest_charge.unwrap_or(intent.id),
            raw,
        })
    }

    #[instrument(skip(self, adjustment), fields(payment_id = %adjustment.payment_id))]
    async fn refund_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        let form = vec![
            ("payment_intent".to_string(), adjustment.payment_id.clone()),
            ("amount".to_string(), adjustment.amount.to_string()),
        ];
        let (refund, raw): (Refund, _) = self
            .post_form("/v1/refunds", &form, &adjustment.idempotency_key)
            .await?;
        if refund.status == "failed" || refund.status == "canceled" {
            return Err(PaymentError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("refund {} {}", refund.id, refund.status),
            });
        }
        Ok(GatewayReceipt {
            transaction_id: refund.id,
            amount: refund.amount,
            raw,
        })
    }

    #[instrument(skip(self, adjustment), fields(payment_id = %adjustment.payment_id))]
    async fn cancel_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        let (intent, raw): (PaymentIntent, _) = self
            .post_form(
                &format!("/v1/payment_intents/{}/cancel", adjustment.payment_id),
                &[],
                &adjustment.idempotency_key,
            )
            .await?;
        Ok(GatewayReceipt {
            transaction_id: intent.id,
            amount: adjustment.amount,
            raw,
        })
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    latest_charge: Option<String>,
    #[serde(default)]
    next_action: Option<NextAction>,
    #[serde(default)]
    last_payment_error: Option<StripeError>,
}

#[derive(Debug, Deserialize)]
struct NextAction {
    #[serde(default)]
    redirect_to_url: Option<RedirectToUrl>,
}

#[derive(Debug, Deserialize)]
struct RedirectToUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    amount: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
}
