//! # Pricing Engine
//!
//! Pure computation of checkout totals. Everything passed in is already in
//! the checkout currency; conversion happens before this point.
//!
//! `final_amount = max(0, subtotal + shipping_cost - discount_amount)`

use crate::checkout::CheckoutItem;
use crate::discount::{DiscountMethod, DiscountTerms};
use crate::shipping::ShippingOption;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Computed amounts for a cart, in minor units of its currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    /// Grams
    pub total_weight: u32,
}

/// Sum of `quantity × unit_price` over all items
pub fn subtotal(items: &[CheckoutItem]) -> i64 {
    items.iter().map(CheckoutItem::line_total).sum()
}

/// Sum of item weights in grams
pub fn total_weight(items: &[CheckoutItem]) -> u32 {
    items
        .iter()
        .fold(0u32, |acc, item| acc.saturating_add(item.line_weight()))
}

/// Discount for a cart, or 0 when the minimum order value is not met
pub fn discount_amount(terms: &DiscountTerms, items: &[CheckoutItem], subtotal: i64) -> i64 {
    if subtotal < terms.min_order_value {
        return 0;
    }

    let eligible: Vec<&CheckoutItem> = items
        .iter()
        .filter(|item| terms.covers(&item.product_id))
        .collect();
    let eligible_amount: i64 = eligible.iter().map(|item| item.line_total()).sum();

    let amount = match &terms.method {
        DiscountMethod::Percentage(percent) => {
            let raw = (Decimal::from(eligible_amount) * *percent / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .unwrap_or(0);
            if terms.max_discount_value > 0 {
                raw.min(terms.max_discount_value)
            } else {
                raw
            }
        }
        DiscountMethod::Fixed(value) => match terms.product_ids {
            None => *value,
            Some(_) => {
                let units: i64 = eligible.iter().map(|item| i64::from(item.quantity)).sum();
                value.saturating_mul(units)
            }
        },
    };

    amount.clamp(0, eligible_amount)
}

/// Compute all totals for a cart snapshot
pub fn calculate_totals(
    items: &[CheckoutItem],
    shipping: Option<&ShippingOption>,
    discount: Option<&DiscountTerms>,
) -> Totals {
    let subtotal = subtotal(items);
    let shipping_cost = shipping.map(|option| option.cost).unwrap_or(0);
    let discount_amount = discount
        .map(|terms| discount_amount(terms, items, subtotal))
        .unwrap_or(0);

    Totals {
        subtotal,
        shipping_cost,
        discount_amount,
        final_amount: (subtotal + shipping_cost - discount_amount).max(0),
        total_weight: total_weight(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::tests::item;

    fn terms(method: DiscountMethod) -> DiscountTerms {
        DiscountTerms {
            discount_id: "d1".into(),
            code: "CODE".into(),
            method,
            product_ids: None,
            min_order_value: 0,
            max_discount_value: 0,
        }
    }

    #[test]
    fn test_subtotal_only() {
        let items = vec![item("TSHIRT", 1999, 2)];
        let totals = calculate_totals(&items, None, None);

        assert_eq!(totals.subtotal, 3998);
        assert_eq!(totals.shipping_cost, 0);
        assert_eq!(totals.discount_amount, 0);
        assert_eq!(totals.final_amount, 3998);
        assert_eq!(totals.total_weight, 200);
    }

    #[test]
    fn test_shipping_and_fixed_discount() {
        let items = vec![item("JACKET", 15000, 1)];
        let shipping = ShippingOption {
            rate_id: "standard".into(),
            name: "Standard".into(),
            cost: 499,
        };
        let save20 = DiscountTerms {
            min_order_value: 10000,
            ..terms(DiscountMethod::Fixed(2000))
        };
        let totals = calculate_totals(&items, Some(&shipping), Some(&save20));

        assert_eq!(totals.discount_amount, 2000);
        assert_eq!(totals.final_amount, 15000 + 499 - 2000);
    }

    #[test]
    fn test_minimum_not_met_gives_zero() {
        let items = vec![item("MUG", 1999, 3)];
        let save20 = DiscountTerms {
            min_order_value: 10000,
            ..terms(DiscountMethod::Fixed(2000))
        };
        assert_eq!(discount_amount(&save20, &items, 5997), 0);
    }

    #[test]
    fn test_fixed_capped_at_subtotal() {
        let items = vec![item("STICKER", 300, 1)];
        let totals = calculate_totals(&items, None, Some(&terms(DiscountMethod::Fixed(1000))));
        assert_eq!(totals.discount_amount, 300);
        assert_eq!(totals.final_amount, 0);
    }

    #[test]
    fn test_percentage_rounding_and_ceiling() {
        let items = vec![item("BOOK", 1999, 1)];
        let ten = terms(DiscountMethod::Percentage(Decimal::TEN));
        // 199.9 rounds to 200
        assert_eq!(discount_amount(&ten, &items, 1999), 200);

        let capped = DiscountTerms {
            max_discount_value: 150,
            ..ten
        };
        assert_eq!(discount_amount(&capped, &items, 1999), 150);
    }

    #[test]
    fn test_product_discount_only_eligible_lines() {
        let items = vec![item("MUG", 1000, 2), item("CAP", 500, 1)];
        let mugs_fixed = DiscountTerms {
            product_ids: Some(vec!["mug".into()]),
            ..terms(DiscountMethod::Fixed(150))
        };
        // 150 per eligible unit
        assert_eq!(discount_amount(&mugs_fixed, &items, 2500), 300);

        let mugs_pct = DiscountTerms {
            product_ids: Some(vec!["mug".into()]),
            ..terms(DiscountMethod::Percentage(Decimal::from(50)))
        };
        assert_eq!(discount_amount(&mugs_pct, &items, 2500), 1000);
    }

    #[test]
    fn test_final_amount_invariant() {
        let cases = vec![
            (vec![item("A", 100, 1)], 0, DiscountMethod::Fixed(5000)),
            (vec![item("A", 2500, 4)], 999, DiscountMethod::Percentage(Decimal::from(15))),
            (vec![], 499, DiscountMethod::Fixed(100)),
        ];
        for (items, shipping_cost, method) in cases {
            let shipping = ShippingOption {
                rate_id: "r".into(),
                name: "R".into(),
                cost: shipping_cost,
            };
            let totals = calculate_totals(&items, Some(&shipping), Some(&terms(method)));
            assert_eq!(
                totals.final_amount,
                (totals.subtotal + totals.shipping_cost - totals.discount_amount).max(0)
            );
        }
    }
}
