//! # Checkout Aggregate
//!
//! A checkout is the mutable cart bound to a browser session. It is the only
//! path into becoming an `Order`.
//!
//! ```text
//!            mutation (add/update/remove/address/discount/currency)
//!              ┌─────┐
//!              ▼     │
//!           ┌────────┴┐  convert   ┌───────────┐
//!  create → │ active  ├───────────►│ completed │
//!           └──┬───┬──┘            └───────────┘
//!     sweeper  │   │ sweeper (empty)
//!              ▼   ▼
//!     ┌───────────┐ ┌─────────┐
//!     │ abandoned │ │ expired │ ── retention / force ──► deleted
//!     └───────────┘ └─────────┘
//! ```
//!
//! Methods here only change the in-memory value. Services load, mutate,
//! reprice and save in one step so a failed mutation never reaches storage.

use crate::discount::AppliedDiscount;
use crate::error::{ShopError, ShopResult};
use crate::pricing::Totals;
use crate::shipping::ShippingOption;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Lifecycle state of a checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
    Expired,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Active => "active",
            CheckoutStatus::Completed => "completed",
            CheckoutStatus::Abandoned => "abandoned",
            CheckoutStatus::Expired => "expired",
        }
    }

    /// Allowed status changes. Deletion is not a status and is handled by storage.
    pub fn can_transition_to(self, next: CheckoutStatus) -> bool {
        use CheckoutStatus::*;
        matches!(
            (self, next),
            (Active, Active) | (Active, Completed) | (Active, Abandoned) | (Active, Expired)
        )
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Postal address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
}

impl Address {
    pub fn validate(&self) -> ShopResult<()> {
        for (field, value) in [
            ("street", &self.street),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
        ] {
            if value.trim().is_empty() {
                return Err(ShopError::Validation(format!("address {field} is required")));
            }
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ShopError::Validation(
                "address country must be a two-letter code".to_string(),
            ));
        }
        Ok(())
    }
}

/// Buyer contact details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub full_name: String,
}

impl CustomerDetails {
    pub fn validate(&self) -> ShopResult<()> {
        if !EMAIL_RE.is_match(self.email.trim()) {
            return Err(ShopError::Validation(format!(
                "invalid email address: {}",
                self.email
            )));
        }
        Ok(())
    }
}

/// A line in the cart. Price is frozen in the checkout currency when added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: String,
    pub variant_id: String,
    pub sku: String,
    /// Product name plus variant name
    pub name: String,
    pub quantity: u32,
    /// Minor units in the checkout currency
    pub unit_price: i64,
    /// Grams per unit
    pub weight: u32,
}

impl CheckoutItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }

    pub fn line_weight(&self) -> u32 {
        self.weight.saturating_mul(self.quantity)
    }
}

/// In-progress cart bound to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkout {
    pub id: Uuid,

    /// Opaque id carried in the session cookie
    pub session_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// ISO 4217 code all amounts are expressed in
    pub currency: String,

    pub status: CheckoutStatus,

    pub items: Vec<CheckoutItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerDetails>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_option: Option<ShippingOption>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_discount: Option<AppliedDiscount>,

    pub totals: Totals,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Checkout {
    /// Create an empty active checkout
    pub fn new(
        session_id: impl Into<String>,
        currency: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id: None,
            currency: crate::money::normalize_code(&currency.into()),
            status: CheckoutStatus::Active,
            items: Vec::new(),
            shipping_address: None,
            billing_address: None,
            customer: None,
            shipping_option: None,
            applied_discount: None,
            totals: Totals::default(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CheckoutStatus::Active
    }

    /// Fail with a conflict unless the checkout can still be mutated
    pub fn ensure_active(&self) -> ShopResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ShopError::Conflict(format!(
                "checkout {} is {}",
                self.id, self.status
            )))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn item(&self, sku: &str) -> Option<&CheckoutItem> {
        self.items.iter().find(|i| i.sku == sku)
    }

    /// Add an item, merging quantities when the SKU is already present
    pub fn upsert_item(&mut self, item: CheckoutItem) {
        match self.items.iter_mut().find(|i| i.sku == item.sku) {
            Some(existing) => existing.quantity += item.quantity,
            None => self.items.push(item),
        }
    }

    /// Set the quantity of an existing line
    pub fn set_quantity(&mut self, sku: &str, quantity: u32) -> ShopResult<()> {
        if quantity == 0 {
            return Err(ShopError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.sku == sku)
            .ok_or_else(|| ShopError::not_found("Checkout item", sku))?;
        item.quantity = quantity;
        Ok(())
    }

    /// Remove a line by SKU
    pub fn remove_item(&mut self, sku: &str) -> ShopResult<()> {
        let before = self.items.len();
        self.items.retain(|i| i.sku != sku);
        if self.items.len() == before {
            return Err(ShopError::not_found("Checkout item", sku));
        }
        Ok(())
    }

    /// Empty the cart, dropping shipping choice and discount with it
    pub fn clear(&mut self) {
        self.items.clear();
        self.shipping_option = None;
        self.applied_discount = None;
    }

    /// Billing address, defaulting to the shipping address
    pub fn effective_billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref().or(self.shipping_address.as_ref())
    }

    /// Store freshly computed totals
    pub fn apply_totals(&mut self, totals: Totals) {
        if let Some(discount) = self.applied_discount.as_mut() {
            discount.amount = totals.discount_amount;
        }
        self.totals = totals;
    }

    /// Record activity and push out expiry
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity_at = now;
        self.expires_at = now + ttl;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn item(sku: &str, price: i64, quantity: u32) -> CheckoutItem {
        CheckoutItem {
            product_id: sku.to_lowercase(),
            variant_id: format!("{}-v", sku.to_lowercase()),
            sku: sku.to_string(),
            name: sku.to_string(),
            quantity,
            unit_price: price,
            weight: 100,
        }
    }

    fn checkout() -> Checkout {
        Checkout::new("sess-1", "usd", Utc::now(), Duration::hours(24))
    }

    #[test]
    fn test_new_checkout() {
        let checkout = checkout();
        assert!(checkout.is_active());
        assert!(checkout.is_empty());
        assert_eq!(checkout.currency, "USD");
        assert_eq!(checkout.expires_at - checkout.created_at, Duration::hours(24));
    }

    #[test]
    fn test_upsert_merges_quantity() {
        let mut checkout = checkout();
        checkout.upsert_item(item("MUG", 1299, 1));
        checkout.upsert_item(item("MUG", 1299, 2));
        checkout.upsert_item(item("CAP", 999, 1));

        assert_eq!(checkout.items.len(), 2);
        assert_eq!(checkout.item("MUG").unwrap().quantity, 3);
        assert_eq!(checkout.item_count(), 4);
    }

    #[test]
    fn test_set_quantity_and_remove() {
        let mut checkout = checkout();
        checkout.upsert_item(item("MUG", 1299, 1));

        assert!(matches!(
            checkout.set_quantity("MUG", 0),
            Err(ShopError::Validation(_))
        ));
        checkout.set_quantity("MUG", 5).unwrap();
        assert_eq!(checkout.item("MUG").unwrap().line_total(), 6495);

        assert!(matches!(
            checkout.remove_item("CAP"),
            Err(ShopError::NotFound { .. })
        ));
        checkout.remove_item("MUG").unwrap();
        assert!(checkout.is_empty());
    }

    #[test]
    fn test_ensure_active() {
        let mut checkout = checkout();
        assert!(checkout.ensure_active().is_ok());
        checkout.status = CheckoutStatus::Completed;
        assert!(matches!(checkout.ensure_active(), Err(ShopError::Conflict(_))));
    }

    #[test]
    fn test_status_transitions() {
        use CheckoutStatus::*;
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Abandoned));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Abandoned.can_transition_to(Completed));
        assert!(!Expired.can_transition_to(Active));
    }

    #[test]
    fn test_address_and_customer_validation() {
        let address = Address {
            street: "Nørregade 1".into(),
            city: "København".into(),
            state: None,
            postal_code: "1165".into(),
            country: "DK".into(),
        };
        assert!(address.validate().is_ok());

        let bad = Address {
            country: "Denmark".into(),
            ..address
        };
        assert!(bad.validate().is_err());

        let customer = CustomerDetails {
            email: "buyer@example.com".into(),
            phone: None,
            full_name: "A Buyer".into(),
        };
        assert!(customer.validate().is_ok());
        let customer = CustomerDetails {
            email: "not-an-email".into(),
            ..customer
        };
        assert!(customer.validate().is_err());
    }

    #[test]
    fn test_billing_defaults_to_shipping() {
        let mut checkout = checkout();
        let address = Address {
            street: "1 Main St".into(),
            city: "Springfield".into(),
            state: Some("IL".into()),
            postal_code: "62701".into(),
            country: "US".into(),
        };
        checkout.shipping_address = Some(address.clone());
        assert_eq!(checkout.effective_billing_address(), Some(&address));
    }
}
