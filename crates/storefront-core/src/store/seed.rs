//! Catalog seed loaded from TOML.
//!
//! ```toml
//! [[currencies]]
//! code = "USD"
//! exchange_rate = "1"
//! is_default = true
//!
//! [[products]]
//! id = "tshirt"
//! name = "T-Shirt"
//!
//! [[products.variants]]
//! id = "tshirt-m"
//! sku = "TSHIRT-M"
//! price = 1999
//! stock = 50
//! ```

use crate::catalog::Product;
use crate::discount::Discount;
use crate::error::{ShopError, ShopResult};
use crate::money::{Currency, CurrencyConverter};
use crate::shipping::ShippingRate;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub currencies: Vec<Currency>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub discounts: Vec<Discount>,
    #[serde(default)]
    pub shipping_rates: Vec<ShippingRate>,
}

impl CatalogSeed {
    pub fn from_toml_str(content: &str) -> ShopResult<Self> {
        let seed: CatalogSeed = toml::from_str(content)
            .map_err(|e| ShopError::Validation(format!("invalid catalog seed: {e}")))?;
        seed.validate()?;
        Ok(seed)
    }

    /// Currency table is consistent and SKUs are unique
    pub fn validate(&self) -> ShopResult<()> {
        CurrencyConverter::new(self.currencies.iter().cloned())?;

        let mut skus = HashSet::new();
        for product in &self.products {
            if product.variants.is_empty() {
                return Err(ShopError::Validation(format!(
                    "product {} has no variants",
                    product.id
                )));
            }
            for variant in &product.variants {
                if !skus.insert(variant.sku.as_str()) {
                    return Err(ShopError::Validation(format!(
                        "duplicate sku: {}",
                        variant.sku
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::DiscountMethod;

    const SEED: &str = r#"
[[currencies]]
code = "USD"
symbol = "$"
exchange_rate = "1"
is_default = true

[[currencies]]
code = "DKK"
symbol = "kr"
exchange_rate = "6.8"

[[products]]
id = "tshirt"
name = "T-Shirt"

[[products.variants]]
id = "tshirt-m"
sku = "TSHIRT-M"
name = "Medium"
price = 1999
stock = 10
weight = 200

[[discounts]]
id = "d-save20"
code = "SAVE20"
method = "fixed"
value = 2000
min_order_value = 10000

[[shipping_rates]]
id = "standard"
method_name = "Standard"
base_cost = 499
free_shipping_threshold = 10000
"#;

    #[test]
    fn test_parse_seed() {
        let seed = CatalogSeed::from_toml_str(SEED).unwrap();
        assert_eq!(seed.currencies.len(), 2);
        assert_eq!(seed.products[0].variants[0].stock, 10);
        assert_eq!(seed.discounts[0].method, DiscountMethod::Fixed(2000));
        assert_eq!(seed.shipping_rates[0].free_shipping_threshold, Some(10000));
    }

    #[test]
    fn test_duplicate_sku_rejected() {
        let doubled = format!(
            "{SEED}\n[[products]]\nid = \"other\"\nname = \"Other\"\n\n[[products.variants]]\nid = \"o\"\nsku = \"TSHIRT-M\"\nprice = 1\n"
        );
        assert!(CatalogSeed::from_toml_str(&doubled).is_err());
    }
}
