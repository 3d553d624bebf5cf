//! # Shipping Rates
//!
//! Shipping rates are stored in the default currency and priced for a
//! checkout on demand. The chosen rate is snapshotted on the checkout as a
//! `ShippingOption`.

use crate::error::ShopResult;
use crate::money::CurrencyConverter;
use serde::{Deserialize, Serialize};

/// Weight bracket: parcels up to `max_weight` grams cost `cost`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTier {
    pub max_weight: u32,
    pub cost: i64,
}

/// A shipping method with its pricing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingRate {
    pub id: String,

    /// Display name (e.g. "Standard", "Express")
    pub method_name: String,

    #[serde(default)]
    pub description: String,

    /// Cost when no tier or threshold applies
    pub base_cost: i64,

    /// Subtotal at or above which shipping is free
    #[serde(default)]
    pub free_shipping_threshold: Option<i64>,

    /// Weight brackets, checked in ascending `max_weight` order
    #[serde(default)]
    pub weight_tiers: Vec<WeightTier>,

    /// Subtotal required before this rate is offered
    #[serde(default)]
    pub min_order_value: i64,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl ShippingRate {
    pub fn new(id: impl Into<String>, method_name: impl Into<String>, base_cost: i64) -> Self {
        Self {
            id: id.into(),
            method_name: method_name.into(),
            description: String::new(),
            base_cost,
            free_shipping_threshold: None,
            weight_tiers: Vec::new(),
            min_order_value: 0,
            active: true,
        }
    }

    /// Builder: free shipping from `threshold`
    pub fn with_free_threshold(mut self, threshold: i64) -> Self {
        self.free_shipping_threshold = Some(threshold);
        self
    }

    /// Builder: add a weight tier
    pub fn with_tier(mut self, max_weight: u32, cost: i64) -> Self {
        self.weight_tiers.push(WeightTier { max_weight, cost });
        self.weight_tiers.sort_by_key(|t| t.max_weight);
        self
    }

    /// Builder: minimum subtotal before the rate is offered
    pub fn with_min_order(mut self, amount: i64) -> Self {
        self.min_order_value = amount;
        self
    }

    /// Whether the rate can be selected for a subtotal in `currency`
    pub fn is_available(
        &self,
        subtotal: i64,
        currency: &str,
        converter: &CurrencyConverter,
    ) -> ShopResult<bool> {
        if !self.active {
            return Ok(false);
        }
        Ok(subtotal >= converter.from_default(self.min_order_value, currency)?)
    }

    /// Cost in `currency` for a basket of `subtotal` (same currency) and `weight` grams
    pub fn cost_for(
        &self,
        subtotal: i64,
        weight: u32,
        currency: &str,
        converter: &CurrencyConverter,
    ) -> ShopResult<i64> {
        if let Some(threshold) = self.free_shipping_threshold {
            if subtotal >= converter.from_default(threshold, currency)? {
                return Ok(0);
            }
        }

        let mut tiers: Vec<&WeightTier> = self.weight_tiers.iter().collect();
        tiers.sort_by_key(|t| t.max_weight);
        let cost = tiers
            .into_iter()
            .find(|tier| weight <= tier.max_weight)
            .map(|tier| tier.cost)
            .unwrap_or(self.base_cost);

        converter.from_default(cost, currency)
    }

    /// Snapshot of this rate priced for a basket
    pub fn option_for(
        &self,
        subtotal: i64,
        weight: u32,
        currency: &str,
        converter: &CurrencyConverter,
    ) -> ShopResult<ShippingOption> {
        Ok(ShippingOption {
            rate_id: self.id.clone(),
            name: self.method_name.clone(),
            cost: self.cost_for(subtotal, weight, currency, converter)?,
        })
    }
}

/// Shipping choice attached to a checkout or order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub rate_id: String,
    pub name: String,
    /// Cost in the checkout/order currency
    pub cost: i64,
}
