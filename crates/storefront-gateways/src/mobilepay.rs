//! # MobilePay ePayment
//!
//! Wallet payments via redirect. Every payment starts pending: the buyer is
//! sent to the wallet app and the outcome arrives by webhook. Captures,
//! refunds and cancels are modifications on the payment reference.

use crate::config::MobilePayConfig;
use crate::http::{build_client, network, read_json, Failure};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use storefront_core::gateway::check_common;
use storefront_core::{
    GatewayReceipt, PaymentAdjustment, PaymentError, PaymentGateway, PaymentMethod,
    PaymentOutcome, PaymentProvider, PaymentRequest, PaymentResult, PaymentStatus,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const PROVIDER: &str = "mobilepay";

const CURRENCIES: &[&str] = &["DKK", "EUR", "NOK"];

static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{8,15}$").expect("valid regex"));

/// Wallet phone numbers: 8 to 15 digits with an optional leading `+`
pub fn validate_phone(phone: Option<&str>) -> PaymentResult<()> {
    match phone.map(|p| p.replace(' ', "")) {
        Some(p) if PHONE.is_match(&p) => Ok(()),
        Some(_) => Err(PaymentError::InvalidRequest(
            "phone number must be 8-15 digits".to_string(),
        )),
        None => Err(PaymentError::InvalidRequest(
            "phone number required for MobilePay".to_string(),
        )),
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct MobilePayGateway {
    config: MobilePayConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl MobilePayGateway {
    pub fn new(config: MobilePayConfig) -> PaymentResult<Self> {
        let client = build_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MobilePayConfig {
        &self.config
    }

    /// Bearer token, refreshed a minute before it lapses
    async fn access_token(&self) -> PaymentResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/accesstoken/get", self.config.api_base_url))
            .header("client_id", &self.config.client_id)
            .header("client_secret", &self.config.client_secret)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Merchant-Serial-Number", &self.config.merchant_serial_number)
            .send()
            .await
            .map_err(network)?;
        let (token, _): (AccessToken, _) =
            read_json(PROVIDER, response).await?.map_err(mobilepay_error)?;

        let lifetime = token.lifetime_secs().saturating_sub(60);
        debug!(lifetime, "Fetched MobilePay access token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(token.access_token)
    }

    async fn authorized(&self, builder: RequestBuilder) -> PaymentResult<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(builder
            .bearer_auth(token)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Merchant-Serial-Number", &self.config.merchant_serial_number)
            .header("Vipps-System-Name", "storefront-rs")
            .header("Vipps-System-Version", env!("CARGO_PKG_VERSION")))
    }

    async fn modify(
        &self,
        action: &str,
        adjustment: &PaymentAdjustment,
    ) -> PaymentResult<GatewayReceipt> {
        let url = format!(
            "{}/epayment/v1/payments/{}/{}",
            self.config.api_base_url, adjustment.payment_id, action
        );
        let builder = self
            .client
            .post(url)
            .header("Idempotency-Key", &adjustment.idempotency_key);
        let builder = if action == "cancel" {
            builder.json(&serde_json::json!({}))
        } else {
            builder.json(&ModificationRequest {
                modification_amount: Amount {
                    currency: adjustment.currency.clone(),
                    value: adjustment.amount,
                },
            })
        };

        let response = self.authorized(builder).await?.send().await.map_err(network)?;
        let (modified, raw): (ModificationResponse, _) =
            read_json(PROVIDER, response).await?.map_err(mobilepay_error)?;

        info!(reference = %modified.reference, action, "MobilePay payment modified");
        Ok(GatewayReceipt {
            transaction_id: modified.psp_reference.unwrap_or(modified.reference),
            amount: adjustment.amount,
            raw,
        })
    }
}

fn mobilepay_error(failure: Failure) -> PaymentError {
    let detail = serde_json::from_str::<ProblemDetails>(&failure.body)
        .ok()
        .and_then(|p| p.detail.or(p.title));
    failure.into_error(PROVIDER, detail)
}

/// Payment status for an ePayment state
fn payment_state(state: &str, captured: i64) -> PaymentStatus {
    match state {
        "AUTHORIZED" if captured > 0 => PaymentStatus::Captured,
        "AUTHORIZED" => PaymentStatus::Authorized,
        "ABORTED" | "EXPIRED" => PaymentStatus::Failed,
        "TERMINATED" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for MobilePayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::MobilePay
    }

    fn supported_currencies(&self) -> Vec<String> {
        CURRENCIES.iter().map(|c| c.to_string()).collect()
    }

    fn supported_methods(&self) -> Vec<PaymentMethod> {
        vec![PaymentMethod::Wallet]
    }

    fn validate_request(&self, request: &PaymentRequest) -> PaymentResult<()> {
        check_common(self, request)?;
        validate_phone(request.phone_number.as_deref())
    }

    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        self.validate_request(request)?;

        let body = CreatePayment {
            amount: Amount {
                currency: request.currency.to_uppercase(),
                value: request.amount,
            },
            payment_method: PaymentMethodType { kind: "WALLET" },
            customer: Customer {
                phone_number: request
                    .phone_number
                    .as_deref()
                    .unwrap_or_default()
                    .trim_start_matches('+')
                    .replace(' ', ""),
            },
            reference: request.order_number.clone(),
            return_url: request
                .return_url
                .clone()
                .unwrap_or_else(|| self.config.default_return_url.clone()),
            user_flow: "WEB_REDIRECT",
            payment_description: request.description.clone(),
        };

        let builder = self
            .client
            .post(format!("{}/epayment/v1/payments", self.config.api_base_url))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body);
        let response = self.authorized(builder).await?.send().await.map_err(network)?;
        let (created, raw): (CreatePaymentResponse, _) =
            read_json(PROVIDER, response).await?.map_err(mobilepay_error)?;

        info!(reference = %created.reference, "Created MobilePay payment");
        Ok(PaymentOutcome {
            payment_id: created.reference,
            status: PaymentStatus::Pending,
            requires_action: true,
            action_url: Some(created.redirect_url),
            raw,
        })
    }

    async fn verify_payment(&self, payment_id: &str) -> PaymentResult<PaymentOutcome> {
        let builder = self.client.get(format!(
            "{}/epayment/v1/payments/{}",
            self.config.api_base_url, payment_id
        ));
        let response = self.authorized(builder).await?.send().await.map_err(network)?;
        let (payment, raw): (GetPaymentResponse, _) =
            read_json(PROVIDER, response).await?.map_err(mobilepay_error)?;

        let captured = payment
            .aggregate
            .and_then(|a| a.captured_amount)
            .map(|a| a.value)
            .unwrap_or(0);
        let status = payment_state(&payment.state, captured);
        Ok(PaymentOutcome {
            payment_id: payment_id.to_string(),
            requires_action: status == PaymentStatus::Pending,
            status,
            action_url: None,
            raw,
        })
    }

    async fn capture_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        self.modify("capture", adjustment).await
    }

    async fn refund_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        self.modify("refund", adjustment).await
    }

    async fn cancel_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        self.modify("cancel", adjustment).await
    }

    /// Approves a pending payment in the test environment
    #[instrument(skip(self))]
    async fn force_approve(&self, payment_id: &str) -> PaymentResult<()> {
        if !self.config.test_mode {
            return Err(PaymentError::Unsupported {
                provider: PROVIDER.to_string(),
                operation: "force_approve outside the test environment".to_string(),
            });
        }
        let builder = self
            .client
            .post(format!(
                "{}/epayment/v1/test/payments/{}/approve",
                self.config.api_base_url, payment_id
            ))
            .json(&serde_json::json!({}));
        let response = self.authorized(builder).await?.send().await.map_err(network)?;
        let _: (serde_json::Value, _) =
            read_json(PROVIDER, response).await?.map_err(mobilepay_error)?;
        info!("MobilePay test payment approved");
        Ok(())
    }
}

// =============================================================================
// ePayment API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    /// Seconds; sent as a string by the token endpoint
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl AccessToken {
    fn lifetime_secs(&self) -> u64 {
        match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(3600),
            Some(serde_json::Value::String(s)) => s.parse().unwrap_or(3600),
            _ => 3600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Amount {
    currency: String,
    value: i64,
}

#[derive(Debug, Serialize)]
struct PaymentMethodType {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Customer {
    phone_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePayment {
    amount: Amount,
    payment_method: PaymentMethodType,
    customer: Customer,
    reference: String,
    return_url: String,
    user_flow: &'static str,
    payment_description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentResponse {
    reference: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPaymentResponse {
    state: String,
    #[serde(default)]
    aggregate: Option<Aggregate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Aggregate {
    #[serde(default)]
    captured_amount: Option<Amount>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModificationRequest {
    modification_amount: Amount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModificationResponse {
    reference: String,
    #[serde(default)]
    psp_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProblemDetails {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}
