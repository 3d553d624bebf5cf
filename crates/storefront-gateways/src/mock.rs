//! # Mock Gateway
//!
//! In-process provider for local development and end-to-end tests. Behavior
//! is steered by the card token:
//!
//! | token            | outcome                         |
//! |------------------|---------------------------------|
//! | `tok_decline`    | declined                        |
//! | `tok_3ds`        | pending, requires action        |
//! | `tok_authorize`  | authorized (capture later)      |
//! | anything else    | captured                        |
//!
//! Wallet payments always require action; `force_approve` authorizes them.

use async_trait::async_trait;
use std::collections::HashMap;
use storefront_core::{
    GatewayReceipt, PaymentAdjustment, PaymentError, PaymentGateway, PaymentMethod,
    PaymentOutcome, PaymentProvider, PaymentRequest, PaymentResult, PaymentStatus,
};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

const CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "DKK", "SEK", "NOK"];

#[derive(Default)]
pub struct MockGateway {
    payments: RwLock<HashMap<String, PaymentStatus>>,
    action_base_url: Option<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: where "requires action" outcomes send the buyer
    pub fn with_action_base_url(mut self, url: impl Into<String>) -> Self {
        self.action_base_url = Some(url.into());
        self
    }

    fn action_url(&self, payment_id: &str) -> String {
        let base = self
            .action_base_url
            .as_deref()
            .unwrap_or("http://localhost:8080/mock-pay");
        format!("{}/{}", base.trim_end_matches('/'), payment_id)
    }

    async fn status_of(&self, payment_id: &str) -> PaymentResult<PaymentStatus> {
        self.payments
            .read()
            .await
            .get(payment_id)
            .copied()
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "mock".to_string(),
                message: format!("no such payment: {payment_id}"),
            })
    }

    async fn set_status(&self, payment_id: &str, status: PaymentStatus) {
        self.payments
            .write()
            .await
            .insert(payment_id.to_string(), status);
    }

    fn receipt(adjustment: &PaymentAdjustment, prefix: &str) -> GatewayReceipt {
        GatewayReceipt {
            transaction_id: format!("{prefix}_{}", Uuid::new_v4().simple()),
            amount: adjustment.amount,
            raw: serde_json::json!({
                "payment_id": adjustment.payment_id,
                "amount": adjustment.amount,
                "currency": adjustment.currency,
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mock
    }

    fn supported_currencies(&self) -> Vec<String> {
        CURRENCIES.iter().map(|c| c.to_string()).collect()
    }

    fn supported_methods(&self) -> Vec<PaymentMethod> {
        vec![PaymentMethod::Card, PaymentMethod::Wallet]
    }

    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        self.validate_request(request)?;

        let token = request
            .card
            .as_ref()
            .and_then(|c| c.token.as_deref())
            .unwrap_or_default();
        if token == "tok_decline" {
            return Err(PaymentError::PaymentDeclined {
                reason: "card_declined".to_string(),
            });
        }

        let payment_id = format!("mock_{}", Uuid::new_v4().simple());
        let status = match (request.method, token) {
            (PaymentMethod::Wallet, _) | (_, "tok_3ds") => PaymentStatus::Pending,
            (_, "tok_authorize") => PaymentStatus::Authorized,
            _ => PaymentStatus::Captured,
        };
        self.set_status(&payment_id, status).await;
        info!(%payment_id, %status, "Mock payment processed");

        let requires_action = status == PaymentStatus::Pending;
        Ok(PaymentOutcome {
            action_url: requires_action.then(|| self.action_url(&payment_id)),
            raw: serde_json::json!({
                "id": payment_id,
                "status": status,
                "amount": request.amount,
                "currency": request.currency,
            }),
            payment_id,
            status,
            requires_action,
        })
    }

    async fn verify_payment(&self, payment_id: &str) -> PaymentResult<PaymentOutcome> {
        let status = self.status_of(payment_id).await?;
        Ok(PaymentOutcome {
            payment_id: payment_id.to_string(),
            status,
            requires_action: status == PaymentStatus::Pending,
            action_url: None,
            raw: serde_json::json!({ "id": payment_id, "status": status }),
        })
    }

    async fn capture_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        self.status_of(&adjustment.payment_id).await?;
        self.set_status(&adjustment.payment_id, PaymentStatus::Captured)
            .await;
        Ok(Self::receipt(adjustment, "mock_cap"))
    }

    async fn refund_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        self.status_of(&adjustment.payment_id).await?;
        self.set_status(&adjustment.payment_id, PaymentStatus::Refunded)
            .await;
        Ok(Self::receipt(adjustment, "mock_re"))
    }

    async fn cancel_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        self.status_of(&adjustment.payment_id).await?;
        self.set_status(&adjustment.payment_id, PaymentStatus::Cancelled)
            .await;
        Ok(Self::receipt(adjustment, "mock_void"))
    }

    async fn force_approve(&self, payment_id: &str) -> PaymentResult<()> {
        self.status_of(payment_id).await?;
        self.set_status(payment_id, PaymentStatus::Authorized).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::CardDetails;

    fn request(method: PaymentMethod, token: Option<&str>) -> PaymentRequest {
        PaymentRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-20261016-000003".into(),
            amount: 2500,
            currency: "EUR".into(),
            method,
            card: token.map(|t| CardDetails {
                token: Some(t.into()),
                ..CardDetails::default()
            }),
            phone_number: None,
            customer_email: None,
            return_url: None,
            description: "test".into(),
            idempotency_key: "payment-1".into(),
        }
    }

    #[tokio::test]
    async fn test_token_steers_outcome() {
        let gateway = MockGateway::new();

        let captured = gateway
            .process_payment(&request(PaymentMethod::Card, Some("tok_visa")))
            .await
            .unwrap();
        assert_eq!(captured.status, PaymentStatus::Captured);
        assert!(captured.is_terminal_success());

        let authorized = gateway
            .process_payment(&request(PaymentMethod::Card, Some("tok_authorize")))
            .await
            .unwrap();
        assert_eq!(authorized.status, PaymentStatus::Authorized);

        let pending = gateway
            .process_payment(&request(PaymentMethod::Card, Some("tok_3ds")))
            .await
            .unwrap();
        assert!(pending.requires_action);
        assert!(pending.action_url.unwrap().ends_with(&pending.payment_id));

        let err = gateway
            .process_payment(&request(PaymentMethod::Card, Some("tok_decline")))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::PaymentDeclined { .. }));
    }

    #[tokio::test]
    async fn test_wallet_force_approve() {
        let gateway = MockGateway::new().with_action_base_url("https://shop.test/pay/");
        let outcome = gateway
            .process_payment(&request(PaymentMethod::Wallet, None))
            .await
            .unwrap();
        assert!(outcome
            .action_url
            .as_deref()
            .unwrap()
            .starts_with("https://shop.test/pay/mock_"));

        gateway.force_approve(&outcome.payment_id).await.unwrap();
        let verified = gateway.verify_payment(&outcome.payment_id).await.unwrap();
        assert_eq!(verified.status, PaymentStatus::Authorized);

        assert!(gateway.force_approve("mock_unknown").await.is_err());
    }
}
