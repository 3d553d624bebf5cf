//! # Payment Operations
//!
//! Initial payment submission for freshly converted orders, and the
//! privileged follow-ups (capture, cancel, refund, force-approve) addressed
//! by the provider's payment id.
//!
//! Every provider call carries an idempotency key. Successful results are
//! fed through the [`TransactionLedger`] under that same key, so when the
//! provider later echoes the operation as a webhook it is recognised as a
//! duplicate.

use crate::clock::Clock;
use crate::error::{PaymentError, ShopError, ShopResult};
use crate::gateway::{
    BoxedPaymentGateway, GatewayReceipt, PaymentAdjustment, PaymentGateways, PaymentProvider,
    PaymentRequest,
};
use crate::ledger::{captured_amount, LedgerOutcome, PaymentEvent, PaymentEventKind, TransactionLedger};
use crate::order::{Order, PaymentStatus};
use crate::store::SharedStore;
use crate::transaction::{
    successful_total, PaymentTransaction, TransactionStatus, TransactionType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How much of a payment an operation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "amount")]
pub enum AmountMode {
    /// Minor units
    Amount(i64),
    /// Everything still available
    Full,
}

/// Order plus what the buyer has to do next
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSubmission {
    pub order: Order,
    pub requires_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

pub struct PaymentService {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    gateways: PaymentGateways,
    ledger: Arc<TransactionLedger>,
}

impl PaymentService {
    pub fn new(
        store: SharedStore,
        clock: Arc<dyn Clock>,
        gateways: PaymentGateways,
        ledger: Arc<TransactionLedger>,
    ) -> Self {
        Self {
            store,
            clock,
            gateways,
            ledger,
        }
    }

    pub fn gateways(&self) -> &PaymentGateways {
        &self.gateways
    }

    pub fn gateway(&self, provider: PaymentProvider) -> ShopResult<&BoxedPaymentGateway> {
        Ok(self.gateways.get(provider)?)
    }

    /// Start payment for a new order.
    ///
    /// Provider failures mark the order and payment `failed` and surface to
    /// the buyer as [`ShopError::PaymentFailed`]; details are only logged.
    #[instrument(skip(self, order, request), fields(order_number = %order.order_number))]
    pub async fn submit(
        &self,
        mut order: Order,
        provider: PaymentProvider,
        request: PaymentRequest,
    ) -> ShopResult<PaymentSubmission> {
        let gateway = self.gateway(provider)?.clone();
        order.payment_provider = Some(provider);
        order.payment_method = Some(request.method);

        let outcome = match gateway.process_payment(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Payment submission failed");
                let now = self.clock.now();
                order.apply_payment_status(PaymentStatus::Failed, now);
                self.store.update_order(&order).await?;

                let failed = PaymentTransaction::new(
                    &order,
                    provider,
                    TransactionType::Authorize,
                    TransactionStatus::Failed,
                    order.final_amount,
                    now,
                )
                .with_idempotency_key(Some(request.idempotency_key.clone()))
                .with_metadata("error", e.to_string());
                if let Err(e) = self.store.insert_transaction(&failed).await {
                    error!(order_id = %order.id, error = %e, "Failed to record failed payment");
                }
                return Err(ShopError::PaymentFailed { order_id: order.id });
            }
        };

        order.external_payment_id = Some(outcome.payment_id.clone());
        order.updated_at = self.clock.now();
        self.store.update_order(&order).await?;

        if outcome.is_terminal_success() {
            let kind = match outcome.status {
                PaymentStatus::Captured => PaymentEventKind::Capture,
                _ => PaymentEventKind::Authorize,
            };
            self.ledger
                .record_event(PaymentEvent {
                    provider,
                    payment_id: outcome.payment_id.clone(),
                    transaction_id: None,
                    kind,
                    success: true,
                    amount: Some(order.final_amount),
                    idempotency_key: Some(request.idempotency_key.clone()),
                    payload: outcome.raw.clone(),
                })
                .await?;
        } else {
            let pending = PaymentTransaction::new(
                &order,
                provider,
                TransactionType::Authorize,
                TransactionStatus::Pending,
                order.final_amount,
                self.clock.now(),
            )
            .with_external_id(outcome.payment_id.clone())
            .with_idempotency_key(Some(request.idempotency_key.clone()))
            .with_response(outcome.raw.clone());
            if let Err(e) = self.store.insert_transaction(&pending).await {
                error!(order_id = %order.id, error = %e, "Failed to record pending payment");
            }
            info!(action_url = ?outcome.action_url, "Payment awaiting buyer action");
        }

        Ok(PaymentSubmission {
            order: self.store.get_order(order.id).await?,
            requires_action: !outcome.is_terminal_success(),
            action_url: outcome.action_url,
        })
    }

    /// Capture an authorized payment
    #[instrument(skip(self))]
    pub async fn capture(&self, payment_id: &str, mode: AmountMode) -> ShopResult<Order> {
        let order = self.order_for_payment(payment_id).await?;
        if order.payment_status != PaymentStatus::Authorized {
            return Err(ShopError::Conflict(format!(
                "cannot capture a payment that is {}",
                order.payment_status
            )));
        }
        let amount = match mode {
            AmountMode::Full => order.final_amount,
            AmountMode::Amount(amount) => amount,
        };
        if amount <= 0 || amount > order.final_amount {
            return Err(ShopError::Validation(format!(
                "capture amount must be between 1 and {}",
                order.final_amount
            )));
        }

        self.adjust(&order, PaymentEventKind::Capture, amount).await
    }

    /// Void a payment that has not been captured
    #[instrument(skip(self))]
    pub async fn cancel(&self, payment_id: &str) -> ShopResult<Order> {
        let order = self.order_for_payment(payment_id).await?;
        if !matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Authorized
        ) {
            return Err(ShopError::Conflict(format!(
                "cannot cancel a payment that is {}",
                order.payment_status
            )));
        }

        self.adjust(&order, PaymentEventKind::Cancel, order.final_amount)
            .await
    }

    /// Refund part or all of what is left of a captured payment
    #[instrument(skip(self))]
    pub async fn refund(&self, payment_id: &str, mode: AmountMode) -> ShopResult<Order> {
        let order = self.order_for_payment(payment_id).await?;
        if !order.payment_status.is_refundable() {
            return Err(ShopError::Conflict(format!(
                "cannot refund a payment that is {}",
                order.payment_status
            )));
        }

        let transactions = self.store.list_transactions(order.id).await?;
        let remaining = captured_amount(&order, &transactions)
            - successful_total(&transactions, TransactionType::Refund);
        let amount = match mode {
            AmountMode::Full => remaining,
            AmountMode::Amount(amount) => amount,
        };
        if remaining <= 0 {
            return Err(ShopError::Conflict("payment is fully refunded".to_string()));
        }
        if amount <= 0 || amount > remaining {
            return Err(ShopError::Validation(format!(
                "refund amount must be between 1 and {remaining}"
            )));
        }

        self.adjust(&order, PaymentEventKind::Refund, amount).await
    }

    /// Approve a pending payment in a sandbox. The provider's webhook
    /// carries the resulting status change.
    #[instrument(skip(self))]
    pub async fn force_approve(&self, payment_id: &str) -> ShopResult<Order> {
        let order = self.order_for_payment(payment_id).await?;
        if order.payment_status != PaymentStatus::Pending {
            return Err(ShopError::Conflict(format!(
                "cannot approve a payment that is {}",
                order.payment_status
            )));
        }
        let gateway = self.gateway(Self::provider_of(&order)?)?;
        gateway.force_approve(payment_id).await?;
        info!(order_number = %order.order_number, "Payment force-approved");
        Ok(order)
    }

    async fn order_for_payment(&self, payment_id: &str) -> ShopResult<Order> {
        self.store
            .find_order_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| ShopError::not_found("Payment", payment_id))
    }

    fn provider_of(order: &Order) -> ShopResult<PaymentProvider> {
        order
            .payment_provider
            .ok_or_else(|| ShopError::Conflict("order has no payment provider".to_string()))
    }

    async fn adjust(&self, order: &Order, kind: PaymentEventKind, amount: i64) -> ShopResult<Order> {
        let provider = Self::provider_of(order)?;
        let gateway = self.gateway(provider)?;
        let payment_id = order
            .external_payment_id
            .clone()
            .ok_or_else(|| ShopError::Conflict("order has no payment".to_string()))?;

        let transaction_type = match kind {
            PaymentEventKind::Capture => TransactionType::Capture,
            PaymentEventKind::Refund => TransactionType::Refund,
            _ => TransactionType::Cancel,
        };
        let adjustment = PaymentAdjustment {
            payment_id: payment_id.clone(),
            amount,
            currency: order.currency.clone(),
            idempotency_key: format!("{}-{}", transaction_type, Uuid::new_v4()),
        };

        let result: Result<GatewayReceipt, PaymentError> = match kind {
            PaymentEventKind::Capture => gateway.capture_payment(&adjustment).await,
            PaymentEventKind::Refund => gateway.refund_payment(&adjustment).await,
            _ => gateway.cancel_payment(&adjustment).await,
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(order_id = %order.id, operation = %transaction_type, error = %e, "Payment operation failed");
                let failed = PaymentTransaction::new(
                    order,
                    provider,
                    transaction_type,
                    TransactionStatus::Failed,
                    amount,
                    self.clock.now(),
                )
                .with_external_id(payment_id)
                .with_idempotency_key(Some(adjustment.idempotency_key))
                .with_metadata("error", e.to_string());
                if let Err(e) = self.store.insert_transaction(&failed).await {
                    error!(order_id = %order.id, error = %e, "Failed to record failed operation");
                }
                return Err(e.into());
            }
        };

        let outcome = self
            .ledger
            .record_event(PaymentEvent {
                provider,
                payment_id,
                transaction_id: Some(receipt.transaction_id),
                kind,
                success: true,
                amount: Some(receipt.amount),
                idempotency_key: Some(adjustment.idempotency_key),
                payload: receipt.raw,
            })
            .await?;
        if !matches!(outcome, LedgerOutcome::Applied { .. }) {
            // A webhook can beat us to it
            warn!(?outcome, "Payment operation was not applied by the ledger");
        }

        self.store.get_order(order.id).await.map_err(Into::into)
    }
}
