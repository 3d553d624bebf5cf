//! # Webhook Transaction Ledger
//!
//! Applies normalized provider payment events to orders. Providers deliver
//! at least once and out of order, so every event goes through the same
//! pipeline:
//!
//! ```text
//! event ─► resolve order ─► idempotency key seen? ─► status rank check
//!            │ none            │ yes                   │ at/behind
//!            ▼                 ▼                       ▼
//!        OrderNotFound      Duplicate              StaleStatus
//!
//!        ─► compare-and-set order ─► record transaction ─► Applied
//!           (+ order status,          (failure logged)
//!            notification)
//! ```
//!
//! Nothing is serialized in process. Two deliveries of the same event are
//! told apart by the store: only one can write the transaction row under the
//! event's key, and only one can move the order's payment status.

use crate::clock::Clock;
use crate::error::{ShopError, ShopResult, StoreError};
use crate::gateway::PaymentProvider;
use crate::notify::{send_confirmation, Notifier};
use crate::order::{Order, PaymentStatus};
use crate::store::SharedStore;
use crate::transaction::{
    successful_total, PaymentTransaction, TransactionStatus, TransactionType, EVENT_KEY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What happened to a payment, as reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Authorize,
    Capture,
    Refund,
    Cancel,
    /// Buyer never completed the payment
    Expire,
}

/// Provider-neutral payment event
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub provider: PaymentProvider,
    /// Provider payment id the order was created with
    pub payment_id: String,
    /// Provider id of this specific operation (refund id), when distinct
    pub transaction_id: Option<String>,
    pub kind: PaymentEventKind,
    pub success: bool,
    /// Minor units; `None` means "the whole amount"
    pub amount: Option<i64>,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::Authorize => "authorize",
            PaymentEventKind::Capture => "capture",
            PaymentEventKind::Refund => "refund",
            PaymentEventKind::Cancel => "cancel",
            PaymentEventKind::Expire => "expire",
        }
    }
}

impl PaymentEvent {
    /// Payment status this event moves the order to, if any
    pub fn implied_status(&self) -> Option<PaymentStatus> {
        match (self.kind, self.success) {
            (PaymentEventKind::Authorize, true) => Some(PaymentStatus::Authorized),
            (PaymentEventKind::Authorize, false) => Some(PaymentStatus::Failed),
            (PaymentEventKind::Capture, true) => Some(PaymentStatus::Captured),
            (PaymentEventKind::Refund, true) => Some(PaymentStatus::Refunded),
            (PaymentEventKind::Cancel, true) => Some(PaymentStatus::Cancelled),
            (PaymentEventKind::Expire, _) => Some(PaymentStatus::Failed),
            (PaymentEventKind::Capture | PaymentEventKind::Refund | PaymentEventKind::Cancel, false) => None,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self.kind {
            PaymentEventKind::Authorize | PaymentEventKind::Expire => TransactionType::Authorize,
            PaymentEventKind::Capture => TransactionType::Capture,
            PaymentEventKind::Refund => TransactionType::Refund,
            PaymentEventKind::Cancel => TransactionType::Cancel,
        }
    }
}

/// Result of applying one event. None of these are errors: the provider is
/// acknowledged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// No order carries this payment id
    OrderNotFound,
    /// Event already recorded
    Duplicate,
    /// Order is already at or beyond the implied status
    StaleStatus { current: PaymentStatus },
    /// Refund would exceed the captured amount
    RefundCapExceeded { requested: i64, remaining: i64 },
    Applied {
        order_id: Uuid,
        payment_status: PaymentStatus,
        /// `None` when the transaction row could not be written
        transaction_id: Option<Uuid>,
    },
}

/// Amount that can be refunded against: successful captures, or the order
/// total when the capture happened without a separate capture row.
pub(crate) fn captured_amount(order: &Order, transactions: &[PaymentTransaction]) -> i64 {
    match successful_total(transactions, TransactionType::Capture) {
        0 => order.final_amount,
        captured => captured,
    }
}

/// Attempts at the compare-and-set order write before giving up
const MAX_ORDER_WRITES: usize = 3;

pub struct TransactionLedger {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl TransactionLedger {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    #[instrument(
        skip(self, event),
        fields(provider = %event.provider, payment_id = %event.payment_id, kind = ?event.kind)
    )]
    pub async fn record_event(&self, event: PaymentEvent) -> ShopResult<LedgerOutcome> {
        let Some(order) = self.store.find_order_by_payment_id(&event.payment_id).await? else {
            warn!("Payment event for unknown payment id dropped");
            return Ok(LedgerOutcome::OrderNotFound);
        };

        if let Some(key) = &event.idempotency_key {
            if self
                .store
                .find_transaction_by_idempotency_key(order.id, key)
                .await?
                .is_some()
            {
                debug!(idempotency_key = %key, "Duplicate payment event ignored");
                return Ok(LedgerOutcome::Duplicate);
            }
        }

        let implied = event.implied_status();
        let mut amount = event.amount.unwrap_or(order.final_amount);

        if event.kind == PaymentEventKind::Refund {
            if !order.payment_status.is_refundable() {
                return Ok(LedgerOutcome::StaleStatus {
                    current: order.payment_status,
                });
            }
            if event.success {
                let transactions = self.store.list_transactions(order.id).await?;
                let already = event.transaction_id.as_ref().is_some_and(|id| {
                    transactions.iter().any(|t| {
                        t.transaction_type == TransactionType::Refund
                            && t.is_successful()
                            && t.external_transaction_id.as_ref() == Some(id)
                    })
                });
                if already {
                    debug!("Refund already recorded");
                    return Ok(LedgerOutcome::Duplicate);
                }

                let remaining = captured_amount(&order, &transactions)
                    - successful_total(&transactions, TransactionType::Refund);
                amount = event.amount.unwrap_or(remaining);
                if amount > remaining {
                    warn!(requested = amount, remaining, "Refund exceeds captured amount");
                    return Ok(LedgerOutcome::RefundCapExceeded {
                        requested: amount,
                        remaining,
                    });
                }
            }
        } else if let Some(next) = implied {
            if !order.accepts_payment_status(next) {
                debug!(current = %order.payment_status, implied = %next, "Stale payment event ignored");
                return Ok(LedgerOutcome::StaleStatus {
                    current: order.payment_status,
                });
            }
        }

        // Only one concurrent delivery can move the payment status, and only
        // one can write the row under the event's key.
        let mut became_paid = false;
        let order = match implied {
            Some(next) => match self.advance_order(order, next).await? {
                Ok((order, paid)) => {
                    became_paid = paid;
                    order
                }
                Err(current) => {
                    debug!(%current, implied = %next, "Order moved on before the event applied");
                    return Ok(LedgerOutcome::StaleStatus { current });
                }
            },
            None => order,
        };

        let recorded = self.record_transaction(&order, &event, amount).await;
        if became_paid {
            send_confirmation(&*self.notifier, &order).await;
        }
        let transaction_id = match recorded {
            Ok(id) => Some(id),
            Err(StoreError::Conflict(_)) => return Ok(LedgerOutcome::Duplicate),
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Failed to record payment transaction");
                None
            }
        };

        if let (Some(next), Some(_)) = (implied, transaction_id) {
            self.settle_pending_authorization(&order, &event, next).await;
        }

        info!(
            order_number = %order.order_number,
            payment_status = %order.payment_status,
            order_status = %order.status,
            "Payment event applied"
        );

        Ok(LedgerOutcome::Applied {
            order_id: order.id,
            payment_status: order.payment_status,
            transaction_id,
        })
    }

    /// Compare-and-set the payment status onto the stored order, re-reading
    /// it when another writer got in first. `Err` carries the payment status
    /// that made the event stale.
    async fn advance_order(
        &self,
        mut order: Order,
        next: PaymentStatus,
    ) -> ShopResult<Result<(Order, bool), PaymentStatus>> {
        for _ in 0..MAX_ORDER_WRITES {
            if !order.accepts_payment_status(next) {
                return Ok(Err(order.payment_status));
            }
            let expected = order.clone();
            let became_paid = order.apply_payment_status(next, self.clock.now());
            if self.store.update_order_if(&order, &expected).await? {
                return Ok(Ok((order, became_paid)));
            }
            order = self.store.get_order(order.id).await?;
        }
        Err(ShopError::Conflict(format!(
            "order {} kept changing while applying a payment event",
            order.order_number
        )))
    }

    /// Settle the latest pending transaction of the event's type, or insert a new one
    async fn record_transaction(
        &self,
        order: &Order,
        event: &PaymentEvent,
        amount: i64,
    ) -> Result<Uuid, StoreError> {
        let now = self.clock.now();
        let status = row_status(event);
        let external_id = event
            .transaction_id
            .clone()
            .unwrap_or_else(|| event.payment_id.clone());

        if let Some(mut pending) = self
            .store
            .latest_pending_transaction(order.id, event.transaction_type())
            .await?
        {
            pending.status = status;
            pending.amount = amount;
            pending.provider_response = event.payload.clone();
            pending.updated_at = now;
            if pending.external_transaction_id.is_none() {
                pending.external_transaction_id = Some(external_id);
            }
            if let Some(key) = &event.idempotency_key {
                pending.metadata.insert(EVENT_KEY.to_string(), key.clone());
            }
            self.store.settle_transaction(&pending).await?;
            return Ok(pending.id);
        }

        let transaction = PaymentTransaction::new(
            order,
            event.provider,
            event.transaction_type(),
            status,
            amount,
            now,
        )
        .with_external_id(external_id)
        .with_idempotency_key(event.idempotency_key.clone())
        .with_response(event.payload.clone());

        self.store.insert_transaction(&transaction).await?;
        Ok(transaction.id)
    }

    /// A capture or cancel that lands while the authorize row is still
    /// pending also decides that row
    async fn settle_pending_authorization(
        &self,
        order: &Order,
        event: &PaymentEvent,
        applied: PaymentStatus,
    ) {
        let status = match (event.kind, applied) {
            (PaymentEventKind::Capture, PaymentStatus::Captured) => TransactionStatus::Successful,
            (PaymentEventKind::Cancel, PaymentStatus::Cancelled) => TransactionStatus::Failed,
            _ => return,
        };

        let pending = match self
            .store
            .latest_pending_transaction(order.id, TransactionType::Authorize)
            .await
        {
            Ok(Some(pending)) => pending,
            Ok(None) => return,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Failed to look up pending authorization");
                return;
            }
        };

        let mut settled = pending;
        settled.status = status;
        settled.updated_at = self.clock.now();
        settled
            .metadata
            .insert("settled_by".to_string(), event.kind.as_str().to_string());
        match self.store.settle_transaction(&settled).await {
            Ok(()) => debug!(transaction_id = %settled.id, ?status, "Pending authorization settled"),
            // Settled by someone else in the meantime
            Err(StoreError::Conflict(_)) => {}
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Failed to settle pending authorization")
            }
        }
    }
}

/// Row status for an event. Follows the outcome the event implies, so an
/// expiry flagged successful by the provider still records a failed payment.
fn row_status(event: &PaymentEvent) -> TransactionStatus {
    match event.implied_status() {
        Some(PaymentStatus::Failed) => TransactionStatus::Failed,
        _ if event.success => TransactionStatus::Successful,
        _ => TransactionStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Harness;
    use crate::store::{OrderRepository, TransactionRepository};
    use crate::order::OrderStatus;
    use serde_json::json;

    fn event(payment_id: &str, kind: PaymentEventKind, key: &str) -> PaymentEvent {
        PaymentEvent {
            provider: PaymentProvider::Mock,
            payment_id: payment_id.to_string(),
            transaction_id: None,
            kind,
            success: true,
            amount: None,
            idempotency_key: Some(key.to_string()),
            payload: json!({ "id": key }),
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_applies_once() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_1").await;

        let first = h
            .ledger
            .record_event(event("pay_1", PaymentEventKind::Capture, "evt_1"))
            .await
            .unwrap();
        assert!(matches!(
            first,
            LedgerOutcome::Applied {
                payment_status: PaymentStatus::Captured,
                transaction_id: Some(_),
                ..
            }
        ));

        let second = h
            .ledger
            .record_event(event("pay_1", PaymentEventKind::Capture, "evt_1"))
            .await
            .unwrap();
        assert_eq!(second, LedgerOutcome::Duplicate);

        let transactions = h.store.list_transactions(order.id).await.unwrap();
        assert_eq!(
            transactions.iter().filter(|t| t.is_successful()).count(),
            1
        );
        assert_eq!(h.notifier.confirmation_count(), 1);
    }

    #[tokio::test]
    async fn test_late_authorization_does_not_regress() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_2").await;

        h.ledger
            .record_event(event("pay_2", PaymentEventKind::Capture, "evt_cap"))
            .await
            .unwrap();
        let late = h
            .ledger
            .record_event(event("pay_2", PaymentEventKind::Authorize, "evt_auth"))
            .await
            .unwrap();

        assert_eq!(
            late,
            LedgerOutcome::StaleStatus {
                current: PaymentStatus::Captured
            }
        );
        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Captured);
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_unknown_payment_is_dropped() {
        let h = Harness::new().await;
        let outcome = h
            .ledger
            .record_event(event("nope", PaymentEventKind::Capture, "evt"))
            .await
            .unwrap();
        assert_eq!(outcome, LedgerOutcome::OrderNotFound);
    }

    #[tokio::test]
    async fn test_pending_authorize_is_settled_in_place() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_3").await;
        let pending = PaymentTransaction::new(
            &order,
            PaymentProvider::Mock,
            TransactionType::Authorize,
            TransactionStatus::Pending,
            order.final_amount,
            h.clock.now(),
        )
        .with_external_id("pay_3")
        .with_idempotency_key(Some("pay-key".into()));
        h.store.insert_transaction(&pending).await.unwrap();

        h.ledger
            .record_event(event("pay_3", PaymentEventKind::Authorize, "evt_a"))
            .await
            .unwrap();

        let transactions = h.store.list_transactions(order.id).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, TransactionStatus::Successful);
        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_refunds_capped_at_captured_amount() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_4").await;
        h.ledger
            .record_event(event("pay_4", PaymentEventKind::Capture, "evt_cap"))
            .await
            .unwrap();

        let mut partial = event("pay_4", PaymentEventKind::Refund, "evt_r1");
        partial.amount = Some(order.final_amount - 1000);
        partial.transaction_id = Some("re_1".into());
        h.ledger.record_event(partial.clone()).await.unwrap();

        // Same refund id under a new event id is not counted twice
        partial.idempotency_key = Some("evt_r1_retry".into());
        assert_eq!(
            h.ledger.record_event(partial).await.unwrap(),
            LedgerOutcome::Duplicate
        );

        let mut too_much = event("pay_4", PaymentEventKind::Refund, "evt_r2");
        too_much.amount = Some(1001);
        too_much.transaction_id = Some("re_2".into());
        assert_eq!(
            h.ledger.record_event(too_much).await.unwrap(),
            LedgerOutcome::RefundCapExceeded {
                requested: 1001,
                remaining: 1000
            }
        );

        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_refund_before_capture_is_stale() {
        let h = Harness::new().await;
        h.pending_order("pay_5").await;
        let outcome = h
            .ledger
            .record_event(event("pay_5", PaymentEventKind::Refund, "evt_r"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LedgerOutcome::StaleStatus {
                current: PaymentStatus::Pending
            }
        );
    }

    #[tokio::test]
    async fn test_record_failure_still_advances_status() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_6").await;
        h.store.fail_transaction_writes(true);

        let outcome = h
            .ledger
            .record_event(event("pay_6", PaymentEventKind::Authorize, "evt_a"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            LedgerOutcome::Applied {
                transaction_id: None,
                payment_status: PaymentStatus::Authorized,
                ..
            }
        ));
        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    /// Pending authorize row as left by a redirect payment
    async fn pending_authorization(h: &Harness, order: &Order, payment_id: &str) -> PaymentTransaction {
        let pending = PaymentTransaction::new(
            order,
            PaymentProvider::Mock,
            TransactionType::Authorize,
            TransactionStatus::Pending,
            order.final_amount,
            h.clock.now(),
        )
        .with_external_id(payment_id)
        .with_idempotency_key(Some(format!("payment-{}", order.id)));
        h.store.insert_transaction(&pending).await.unwrap();
        pending
    }

    #[tokio::test]
    async fn test_expired_wallet_payment_fails_order() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_7").await;
        pending_authorization(&h, &order, "pay_7").await;

        // Wallet providers flag expiry notifications as successful deliveries
        h.ledger
            .record_event(event("pay_7", PaymentEventKind::Expire, "evt_x"))
            .await
            .unwrap();

        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(stored.status, OrderStatus::Failed);

        let transactions = h.store.list_transactions(order.id).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction_type, TransactionType::Authorize);
        assert_eq!(transactions[0].status, TransactionStatus::Failed);
        assert_eq!(h.notifier.confirmation_count(), 0);
    }

    #[tokio::test]
    async fn test_late_authorization_failure_after_success_is_stale() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_8").await;
        h.ledger
            .record_event(event("pay_8", PaymentEventKind::Authorize, "evt_ok"))
            .await
            .unwrap();

        let mut failed = event("pay_8", PaymentEventKind::Authorize, "evt_old_attempt");
        failed.success = false;
        let outcome = h.ledger.record_event(failed).await.unwrap();

        assert_eq!(
            outcome,
            LedgerOutcome::StaleStatus {
                current: PaymentStatus::Authorized
            }
        );
        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Authorized);
        assert_eq!(stored.status, OrderStatus::Paid);
        let transactions = h.store.list_transactions(order.id).await.unwrap();
        assert!(transactions
            .iter()
            .all(|t| t.status != TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_capture_settles_pending_authorization() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_9").await;
        let pending = pending_authorization(&h, &order, "pay_9").await;

        h.ledger
            .record_event(event("pay_9", PaymentEventKind::Capture, "evt_cap"))
            .await
            .unwrap();

        let transactions = h.store.list_transactions(order.id).await.unwrap();
        assert_eq!(transactions.len(), 2);
        let authorize = transactions.iter().find(|t| t.id == pending.id).unwrap();
        assert_eq!(authorize.status, TransactionStatus::Successful);
        assert_eq!(
            authorize.metadata.get("settled_by").map(String::as_str),
            Some("capture")
        );
        let capture = transactions
            .iter()
            .find(|t| t.transaction_type == TransactionType::Capture)
            .unwrap();
        assert_eq!(capture.status, TransactionStatus::Successful);
        assert!(h
            .store
            .latest_pending_transaction(order.id, TransactionType::Authorize)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_redelivery_after_settling_pending_row_is_duplicate() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_10").await;
        pending_authorization(&h, &order, "pay_10").await;

        h.ledger
            .record_event(event("pay_10", PaymentEventKind::Authorize, "evt_a"))
            .await
            .unwrap();
        let again = h
            .ledger
            .record_event(event("pay_10", PaymentEventKind::Authorize, "evt_a"))
            .await
            .unwrap();

        assert_eq!(again, LedgerOutcome::Duplicate);
        assert_eq!(h.store.list_transactions(order.id).await.unwrap().len(), 1);
        assert_eq!(h.notifier.confirmation_count(), 1);
    }

    #[tokio::test]
    async fn test_order_changed_underneath_is_reread() {
        let h = Harness::new().await;
        let order = h.pending_order("pay_11").await;

        // Another writer authorizes between our read and our write
        let mut moved = order.clone();
        moved.apply_payment_status(PaymentStatus::Authorized, h.clock.now());
        assert!(h.store.update_order_if(&moved, &order).await.unwrap());

        let advanced = h
            .ledger
            .advance_order(order.clone(), PaymentStatus::Captured)
            .await
            .unwrap();
        let (stored, became_paid) = advanced.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Captured);
        assert!(!became_paid);

        let stale = h
            .ledger
            .advance_order(order, PaymentStatus::Authorized)
            .await
            .unwrap();
        assert_eq!(stale.unwrap_err(), PaymentStatus::Captured);
    }
}
