//! Payment transaction records.
//!
//! Every interaction with a payment provider (our own calls and their
//! webhooks) ends up as one row here. Rows are keyed for deduplication by
//! `(order_id, idempotency_key)`.

use crate::gateway::PaymentProvider;
use crate::order::Order;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Authorize,
    Capture,
    Refund,
    Cancel,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Authorize => "authorize",
            TransactionType::Capture => "capture",
            TransactionType::Refund => "refund",
            TransactionType::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Successful,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub order_id: Uuid,

    /// Provider-side id (payment intent, refund id, wallet reference)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    pub transaction_type: TransactionType,
    pub status: TransactionStatus,

    /// Minor units of `currency`
    pub amount: i64,
    pub currency: String,
    pub provider: PaymentProvider,

    /// Raw provider payload
    #[serde(default)]
    pub provider_response: serde_json::Value,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn new(
        order: &Order,
        provider: PaymentProvider,
        transaction_type: TransactionType,
        status: TransactionStatus,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            external_transaction_id: None,
            idempotency_key: None,
            transaction_type,
            status,
            amount,
            currency: order.currency.clone(),
            provider,
            provider_response: serde_json::Value::Null,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_transaction_id = Some(id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.provider_response = response;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_successful(&self) -> bool {
        self.status == TransactionStatus::Successful
    }

    /// Whether this row was written under `key`, either as its own
    /// idempotency key or as the key of the event that settled it
    pub fn answers_to_key(&self, key: &str) -> bool {
        self.idempotency_key.as_deref() == Some(key)
            || self.metadata.get(EVENT_KEY).map(String::as_str) == Some(key)
    }
}

/// Metadata entry holding the key of the provider event that settled a
/// pending row
pub const EVENT_KEY: &str = "event_key";

/// Sum of successful transactions of one type
pub fn successful_total(transactions: &[PaymentTransaction], kind: TransactionType) -> i64 {
    transactions
        .iter()
        .filter(|t| t.transaction_type == kind && t.is_successful())
        .map(|t| t.amount)
        .sum()
}
