//! # Money & Currency Conversion
//!
//! All amounts are `i64` minor units (cents, øre). Exchange rates are stored
//! relative to a single default currency: `1 default = rate × currency`.
//!
//! Conversion is done in `rust_decimal` and rounded half away from zero back
//! to whole minor units, so converting into a currency of equal or finer
//! resolution and back reproduces the original amount.

use crate::error::{ShopError, ShopResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A stored currency with its exchange rate against the default currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    /// ISO 4217 code, upper case (e.g. "USD", "DKK")
    pub code: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Display symbol (e.g. "$", "kr")
    #[serde(default)]
    pub symbol: String,

    /// Number of minor-unit digits (JPY has 0, most others 2)
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,

    /// Units of this currency per one unit of the default currency
    pub exchange_rate: Decimal,

    /// Whether checkouts may use this currency
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether this is the default (rate 1) currency
    #[serde(default)]
    pub is_default: bool,
}

fn default_decimal_places() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Currency {
    pub fn new(code: impl Into<String>, exchange_rate: Decimal) -> Self {
        Self {
            code: normalize_code(&code.into()),
            name: String::new(),
            symbol: String::new(),
            decimal_places: 2,
            exchange_rate,
            enabled: true,
            is_default: false,
        }
    }

    /// Builder: mark as default currency
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Builder: set display symbol
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Builder: set minor-unit digits
    pub fn with_decimal_places(mut self, places: u32) -> Self {
        self.decimal_places = places;
        self
    }

    fn minor_scale(&self) -> Decimal {
        Decimal::from(10i64.pow(self.decimal_places))
    }

    /// Format a minor-unit amount for display (e.g. "$19.99", "135.93 kr")
    pub fn display(&self, amount: i64) -> String {
        let major = Decimal::from(amount) / self.minor_scale();
        let value = format!("{:.*}", self.decimal_places as usize, major);
        if self.symbol.is_empty() {
            format!("{} {}", value, self.code)
        } else if self.symbol.chars().all(char::is_alphabetic) {
            format!("{} {}", value, self.symbol)
        } else {
            format!("{}{}", self.symbol, value)
        }
    }
}

/// Normalize a currency code for lookups
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Converts minor-unit amounts between stored currencies.
///
/// Built from a snapshot of the currency table; cheap to construct per request.
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    currencies: HashMap<String, Currency>,
    default_code: String,
}

impl CurrencyConverter {
    /// Build a converter. Exactly one currency must be marked default and all
    /// rates must be positive.
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> ShopResult<Self> {
        let mut map = HashMap::new();
        let mut default_code = None;

        for mut currency in currencies {
            currency.code = normalize_code(&currency.code);
            if currency.exchange_rate <= Decimal::ZERO {
                return Err(ShopError::Validation(format!(
                    "exchange rate for {} must be positive",
                    currency.code
                )));
            }
            if currency.is_default {
                if default_code.is_some() {
                    return Err(ShopError::Validation(
                        "more than one default currency configured".to_string(),
                    ));
                }
                default_code = Some(currency.code.clone());
            }
            map.insert(currency.code.clone(), currency);
        }

        let default_code = default_code.ok_or_else(|| {
            ShopError::Validation("no default currency configured".to_string())
        })?;

        Ok(Self {
            currencies: map,
            default_code,
        })
    }

    /// Code of the default currency
    pub fn default_code(&self) -> &str {
        &self.default_code
    }

    /// Look up an enabled currency
    pub fn resolve(&self, code: &str) -> ShopResult<&Currency> {
        let code = normalize_code(code);
        match self.currencies.get(&code) {
            Some(currency) if currency.enabled => Ok(currency),
            _ => Err(ShopError::UnsupportedCurrency { currency: code }),
        }
    }

    /// Check whether a currency is known and enabled
    pub fn is_supported(&self, code: &str) -> bool {
        self.resolve(code).is_ok()
    }

    /// Convert `amount` minor units of `from` into minor units of `to`
    pub fn convert(&self, amount: i64, from: &str, to: &str) -> ShopResult<i64> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if source.code == target.code {
            return Ok(amount);
        }

        let numerator = Decimal::from(amount) * target.exchange_rate * target.minor_scale();
        let denominator = source.exchange_rate * source.minor_scale();
        let converted = (numerator / denominator)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

        converted.to_i64().ok_or_else(|| {
            ShopError::Validation(format!(
                "amount {} {} cannot be represented in {}",
                amount, source.code, target.code
            ))
        })
    }

    /// Convert an amount expressed in the default currency
    pub fn from_default(&self, amount: i64, to: &str) -> ShopResult<i64> {
        let default_code = self.default_code.clone();
        self.convert(amount, &default_code, to)
    }

    /// Convert an amount into the default currency
    pub fn to_default(&self, amount: i64, from: &str) -> ShopResult<i64> {
        let default_code = self.default_code.clone();
        self.convert(amount, from, &default_code)
    }

    /// Format an amount in the given currency, falling back to the raw code
    pub fn display(&self, amount: i64, code: &str) -> String {
        match self.resolve(code) {
            Ok(currency) => currency.display(amount),
            Err(_) => format!("{} {}", amount, normalize_code(code)),
        }
    }
}
