//! # Catalog Types
//!
//! Read model of the product catalog as the checkout sees it. Catalog CRUD
//! lives elsewhere; the checkout only looks products up by SKU, reads prices
//! and stock, and decrements stock on order conversion.

use crate::error::ShopResult;
use crate::money::{normalize_code, CurrencyConverter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sellable variant of a product (size, colour, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    /// Variant identifier
    pub id: String,

    /// Stock keeping unit, unique across the catalog
    pub sku: String,

    /// Variant display name (e.g. "Medium / Blue")
    #[serde(default)]
    pub name: String,

    /// Price in the default currency, minor units
    pub price: i64,

    /// Explicit prices per currency code, minor units
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub prices: HashMap<String, i64>,

    /// Units in stock
    #[serde(default)]
    pub stock: u32,

    /// Unit weight in grams
    #[serde(default)]
    pub weight: u32,
}

impl ProductVariant {
    pub fn new(id: impl Into<String>, sku: impl Into<String>, price: i64, stock: u32) -> Self {
        Self {
            id: id.into(),
            sku: sku.into(),
            name: String::new(),
            price,
            prices: HashMap::new(),
            stock,
            weight: 0,
        }
    }

    /// Builder: set weight in grams
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Builder: set an explicit price for a currency
    pub fn with_price_in(mut self, currency: &str, amount: i64) -> Self {
        self.prices.insert(normalize_code(currency), amount);
        self
    }

    /// Unit price in `currency`: the explicit price when set, otherwise the
    /// default-currency price converted.
    pub fn price_in(&self, currency: &str, converter: &CurrencyConverter) -> ShopResult<i64> {
        match self.prices.get(&normalize_code(currency)) {
            Some(price) => Ok(*price),
            None => converter.from_default(self.price, currency),
        }
    }
}

/// A product in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Unique product identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Whether this product is active and available for purchase
    #[serde(default = "default_true")]
    pub active: bool,

    /// Currencies this product may be sold in; empty means every enabled currency
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub currencies: Vec<String>,

    /// Variants (at least one)
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            currencies: Vec::new(),
            variants: Vec::new(),
        }
    }

    /// Builder: add a variant
    pub fn with_variant(mut self, variant: ProductVariant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Builder: restrict sale to the given currencies
    pub fn with_currencies(mut self, codes: &[&str]) -> Self {
        self.currencies = codes.iter().map(|c| normalize_code(c)).collect();
        self
    }

    /// Find a variant by SKU
    pub fn variant(&self, sku: &str) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.sku == sku)
    }

    /// Whether this product may be sold in `currency`
    pub fn available_in(&self, currency: &str) -> bool {
        self.active
            && (self.currencies.is_empty()
                || self.currencies.contains(&normalize_code(currency)))
    }

    /// Display name for a line item: product name plus variant name
    pub fn line_name(&self, variant: &ProductVariant) -> String {
        if variant.name.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.name, variant.name)
        }
    }
}
