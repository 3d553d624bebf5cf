//! # Discounts
//!
//! Discount codes as stored, their eligibility rules, and the currency-local
//! terms the pricing engine works with.

use crate::checkout::CheckoutItem;
use crate::error::{DiscountRejection, ShopResult};
use crate::money::CurrencyConverter;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a discount applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// The whole basket
    #[default]
    Basket,
    /// Only items of the listed products
    Product,
}

/// How the discount amount is computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum DiscountMethod {
    /// Percent of the eligible amount (e.g. `10` for 10%)
    Percentage(Decimal),
    /// Fixed minor-unit amount (per eligible unit for product discounts)
    Fixed(i64),
}

/// A stored discount code. Money fields are in the default currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: String,

    /// Code entered by the buyer, matched case-insensitively
    pub code: String,

    #[serde(default)]
    pub discount_type: DiscountType,

    #[serde(flatten)]
    pub method: DiscountMethod,

    /// Eligible products for `DiscountType::Product`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_ids: Vec<String>,

    /// Minimum basket subtotal before the discount applies
    #[serde(default)]
    pub min_order_value: i64,

    /// Ceiling for percentage discounts; 0 means none
    #[serde(default)]
    pub max_discount_value: i64,

    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,

    /// Maximum number of orders that may use the code
    #[serde(default)]
    pub usage_limit: Option<u32>,

    #[serde(default)]
    pub current_usage: u32,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Discount {
    /// Create an always-valid basket discount
    pub fn basket(id: impl Into<String>, code: impl Into<String>, method: DiscountMethod) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            discount_type: DiscountType::Basket,
            method,
            product_ids: Vec::new(),
            min_order_value: 0,
            max_discount_value: 0,
            starts_at: None,
            ends_at: None,
            usage_limit: None,
            current_usage: 0,
            active: true,
        }
    }

    /// Builder: restrict to products
    pub fn for_products(mut self, product_ids: &[&str]) -> Self {
        self.discount_type = DiscountType::Product;
        self.product_ids = product_ids.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Builder: minimum order value (default currency)
    pub fn with_min_order(mut self, amount: i64) -> Self {
        self.min_order_value = amount;
        self
    }

    /// Builder: percentage ceiling (default currency)
    pub fn with_max_discount(mut self, amount: i64) -> Self {
        self.max_discount_value = amount;
        self
    }

    /// Builder: validity window
    pub fn with_window(
        mut self,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.starts_at = starts_at;
        self.ends_at = ends_at;
        self
    }

    /// Builder: usage limit
    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    /// Checks that do not depend on the cart
    pub fn check_availability(&self, now: DateTime<Utc>) -> Result<(), DiscountRejection> {
        if !self.active {
            return Err(DiscountRejection::Inactive);
        }
        if self.starts_at.is_some_and(|start| now < start) {
            return Err(DiscountRejection::NotStarted);
        }
        if self.ends_at.is_some_and(|end| now > end) {
            return Err(DiscountRejection::Expired);
        }
        if self
            .usage_limit
            .is_some_and(|limit| self.current_usage >= limit)
        {
            return Err(DiscountRejection::UsageLimitReached);
        }
        Ok(())
    }

    /// Terms expressed in `currency`
    pub fn terms_in(&self, currency: &str, converter: &CurrencyConverter) -> ShopResult<DiscountTerms> {
        let method = match &self.method {
            DiscountMethod::Percentage(pct) => DiscountMethod::Percentage(*pct),
            DiscountMethod::Fixed(amount) => {
                DiscountMethod::Fixed(converter.from_default(*amount, currency)?)
            }
        };
        Ok(DiscountTerms {
            discount_id: self.id.clone(),
            code: self.code.clone(),
            method,
            product_ids: match self.discount_type {
                DiscountType::Basket => None,
                DiscountType::Product => Some(self.product_ids.clone()),
            },
            min_order_value: converter.from_default(self.min_order_value, currency)?,
            max_discount_value: converter.from_default(self.max_discount_value, currency)?,
        })
    }

    /// Full eligibility check for applying this code to a cart
    pub fn check_eligibility(
        &self,
        now: DateTime<Utc>,
        terms: &DiscountTerms,
        items: &[CheckoutItem],
        subtotal: i64,
    ) -> Result<(), DiscountRejection> {
        self.check_availability(now)?;
        if subtotal < terms.min_order_value {
            return Err(DiscountRejection::MinimumOrderNotMet);
        }
        if !items.iter().any(|item| terms.covers(&item.product_id)) {
            return Err(DiscountRejection::NotApplicable);
        }
        Ok(())
    }
}

/// Discount rules converted into a checkout's currency
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountTerms {
    pub discount_id: String,
    pub code: String,
    pub method: DiscountMethod,
    /// `None` for basket discounts
    pub product_ids: Option<Vec<String>>,
    pub min_order_value: i64,
    pub max_discount_value: i64,
}

impl DiscountTerms {
    /// Whether items of `product_id` count towards the discount
    pub fn covers(&self, product_id: &str) -> bool {
        match &self.product_ids {
            None => true,
            Some(ids) => ids.iter().any(|id| id == product_id),
        }
    }
}

/// Discount snapshot attached to a checkout or order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub discount_id: String,
    pub code: String,
    /// Amount in the checkout/order currency
    pub amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::tests::converter;
    use chrono::Duration;

    fn save20() -> Discount {
        Discount::basket("d-save20", "SAVE20", DiscountMethod::Fixed(2000)).with_min_order(10000)
    }

    fn item(product_id: &str, price: i64, qty: u32) -> CheckoutItem {
        CheckoutItem {
            product_id: product_id.to_string(),
            variant_id: format!("{product_id}-v"),
            sku: product_id.to_uppercase(),
            name: product_id.to_string(),
            quantity: qty,
            unit_price: price,
            weight: 0,
        }
    }

    #[test]
    fn test_availability_window() {
        let now = Utc::now();
        let discount = save20().with_window(Some(now + Duration::days(1)), None);
        assert_eq!(
            discount.check_availability(now),
            Err(DiscountRejection::NotStarted)
        );

        let discount = save20().with_window(None, Some(now - Duration::days(1)));
        assert_eq!(discount.check_availability(now), Err(DiscountRejection::Expired));
    }

    #[test]
    fn test_usage_limit_and_inactive() {
        let now = Utc::now();
        let mut discount = save20().with_usage_limit(3);
        discount.current_usage = 3;
        assert_eq!(
            discount.check_availability(now),
            Err(DiscountRejection::UsageLimitReached)
        );

        let mut discount = save20();
        discount.active = false;
        assert_eq!(discount.check_availability(now), Err(DiscountRejection::Inactive));
    }

    #[test]
    fn test_minimum_order_value() {
        let conv = converter();
        let discount = save20();
        let terms = discount.terms_in("USD", &conv).unwrap();

        let items = vec![item("mug", 1999, 3)];
        assert_eq!(
            discount.check_eligibility(Utc::now(), &terms, &items, 5997),
            Err(DiscountRejection::MinimumOrderNotMet)
        );

        let items = vec![item("jacket", 15000, 1)];
        assert!(discount
            .check_eligibility(Utc::now(), &terms, &items, 15000)
            .is_ok());
    }

    #[test]
    fn test_terms_converted_to_checkout_currency() {
        let conv = converter();
        let terms = save20().terms_in("DKK", &conv).unwrap();
        assert_eq!(terms.method, DiscountMethod::Fixed(13600));
        assert_eq!(terms.min_order_value, 68000);
    }

    #[test]
    fn test_product_discount_requires_eligible_item() {
        let conv = converter();
        let discount = Discount::basket("d-mug", "MUGS10", DiscountMethod::Percentage(Decimal::TEN))
            .for_products(&["mug"]);
        let terms = discount.terms_in("USD", &conv).unwrap();

        let items = vec![item("tshirt", 1999, 1)];
        assert_eq!(
            discount.check_eligibility(Utc::now(), &terms, &items, 1999),
            Err(DiscountRejection::NotApplicable)
        );
    }

    #[test]
    fn test_method_from_toml() {
        let discount: Discount = toml::from_str(
            r#"
            id = "d-welcome"
            code = "WELCOME10"
            method = "percentage"
            value = "10"
            max_discount_value = 5000
            "#,
        )
        .unwrap();
        assert_eq!(discount.method, DiscountMethod::Percentage(Decimal::TEN));
        assert_eq!(discount.discount_type, DiscountType::Basket);
        assert!(discount.active);
    }
}
