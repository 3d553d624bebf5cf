//! # Checkout Service
//!
//! Buyer-facing cart operations, addressed by session id.
//!
//! Every mutation follows the same path: load the checkout, require it to be
//! active, change the in-memory copy, then [`CheckoutService::persist`]
//! re-validates stock, reprices, refreshes expiry and writes it back with
//! `save_active_checkout`. An error anywhere leaves storage untouched.

use crate::checkout::{Address, Checkout, CheckoutItem, CheckoutStatus, CustomerDetails};
use crate::clock::Clock;
use crate::conversion::OrderConverter;
use crate::discount::AppliedDiscount;
use crate::error::{DiscountRejection, ShopError, ShopResult, StoreError};
use crate::gateway::{CardDetails, PaymentMethod, PaymentProvider, PaymentRequest};
use crate::money::CurrencyConverter;
use crate::payments::{PaymentService, PaymentSubmission};
use crate::pricing::{self, calculate_totals};
use crate::shipping::ShippingOption;
use crate::store::{load_converter, SharedStore};
use chrono::Duration;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Inactivity window after which a checkout counts as expired
    pub ttl: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
        }
    }
}

/// Payment choice submitted with `complete`
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteCheckout {
    pub provider: PaymentProvider,
    pub method: PaymentMethod,
    #[serde(default)]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    settings: CheckoutSettings,
    converter: OrderConverter,
    payments: Arc<PaymentService>,
}

impl CheckoutService {
    pub fn new(
        store: SharedStore,
        clock: Arc<dyn Clock>,
        settings: CheckoutSettings,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            converter: OrderConverter::new(store.clone(), clock.clone()),
            store,
            clock,
            settings,
            payments,
        }
    }

    /// Active checkout for a session, or a fresh one under a new session id
    #[instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> ShopResult<Checkout> {
        if let Some(session_id) = session_id {
            if let Some(mut checkout) = self.store.find_checkout_by_session(session_id).await? {
                if checkout.is_active() {
                    if checkout.user_id.is_none() && user_id.is_some() {
                        checkout.user_id = user_id.map(str::to_string);
                        checkout = self.persist(checkout).await?;
                    }
                    return Ok(checkout);
                }
            }
        }

        let converter = load_converter(&*self.store).await?;
        let mut checkout = Checkout::new(
            Uuid::new_v4().to_string(),
            converter.default_code(),
            self.clock.now(),
            self.settings.ttl,
        );
        checkout.user_id = user_id.map(str::to_string);
        self.store.insert_checkout(&checkout).await?;

        info!(checkout_id = %checkout.id, "Checkout created");
        Ok(checkout)
    }

    /// Add units of a SKU, merging with an existing line
    #[instrument(skip(self))]
    pub async fn add_item(&self, session_id: &str, sku: &str, quantity: u32) -> ShopResult<Checkout> {
        if quantity == 0 {
            return Err(ShopError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        let mut checkout = self.load(session_id).await?;
        let converter = load_converter(&*self.store).await?;

        let product = self
            .store
            .find_product_by_sku(sku)
            .await?
            .ok_or_else(|| ShopError::not_found("Product", sku))?;
        if !product.available_in(&checkout.currency) {
            return Err(ShopError::Validation(format!(
                "{} is not available in {}",
                product.name, checkout.currency
            )));
        }
        let variant = product
            .variant(sku)
            .ok_or_else(|| ShopError::not_found("Product", sku))?;

        checkout.upsert_item(CheckoutItem {
            product_id: product.id.clone(),
            variant_id: variant.id.clone(),
            sku: variant.sku.clone(),
            name: product.line_name(variant),
            quantity,
            unit_price: variant.price_in(&checkout.currency, &converter)?,
            weight: variant.weight,
        });

        self.persist_with(checkout, &converter).await
    }

    /// Set the quantity of a line (must be at least 1)
    #[instrument(skip(self))]
    pub async fn update_item(&self, session_id: &str, sku: &str, quantity: u32) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        checkout.set_quantity(sku, quantity)?;
        self.persist(checkout).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, session_id: &str, sku: &str) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        checkout.remove_item(sku)?;
        self.persist(checkout).await
    }

    /// Empty the cart
    #[instrument(skip(self))]
    pub async fn clear(&self, session_id: &str) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        checkout.clear();
        self.persist(checkout).await
    }

    #[instrument(skip(self, address))]
    pub async fn set_shipping_address(&self, session_id: &str, address: Address) -> ShopResult<Checkout> {
        address.validate()?;
        let mut checkout = self.load(session_id).await?;
        checkout.shipping_address = Some(address);
        self.persist(checkout).await
    }

    #[instrument(skip(self, address))]
    pub async fn set_billing_address(&self, session_id: &str, address: Address) -> ShopResult<Checkout> {
        address.validate()?;
        let mut checkout = self.load(session_id).await?;
        checkout.billing_address = Some(address);
        self.persist(checkout).await
    }

    #[instrument(skip(self, customer))]
    pub async fn set_customer(&self, session_id: &str, customer: CustomerDetails) -> ShopResult<Checkout> {
        customer.validate()?;
        let mut checkout = self.load(session_id).await?;
        checkout.customer = Some(customer);
        self.persist(checkout).await
    }

    /// Shipping rates the current cart qualifies for, priced in its currency
    #[instrument(skip(self))]
    pub async fn shipping_options(&self, session_id: &str) -> ShopResult<Vec<ShippingOption>> {
        let checkout = self.load(session_id).await?;
        let converter = load_converter(&*self.store).await?;
        let subtotal = pricing::subtotal(&checkout.items);
        let weight = pricing::total_weight(&checkout.items);

        let mut options = Vec::new();
        for rate in self.store.list_shipping_rates().await? {
            if rate.is_available(subtotal, &checkout.currency, &converter)? {
                options.push(rate.option_for(subtotal, weight, &checkout.currency, &converter)?);
            }
        }
        options.sort_by_key(|o| o.cost);
        Ok(options)
    }

    #[instrument(skip(self))]
    pub async fn set_shipping_method(&self, session_id: &str, rate_id: &str) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        let converter = load_converter(&*self.store).await?;
        let rate = self
            .store
            .get_shipping_rate(rate_id)
            .await?
            .ok_or_else(|| ShopError::not_found("Shipping rate", rate_id))?;

        let subtotal = pricing::subtotal(&checkout.items);
        if !rate.is_available(subtotal, &checkout.currency, &converter)? {
            return Err(ShopError::Validation(format!(
                "shipping method {} is not available for this order",
                rate.method_name
            )));
        }
        checkout.shipping_option = Some(rate.option_for(
            subtotal,
            pricing::total_weight(&checkout.items),
            &checkout.currency,
            &converter,
        )?);

        self.persist_with(checkout, &converter).await
    }

    /// Attach a discount code. Only one code per checkout.
    #[instrument(skip(self))]
    pub async fn apply_discount(&self, session_id: &str, code: &str) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        if let Some(applied) = &checkout.applied_discount {
            return Err(ShopError::Conflict(format!(
                "discount {} is already applied",
                applied.code
            )));
        }

        let converter = load_converter(&*self.store).await?;
        let discount = self
            .store
            .find_discount_by_code(code)
            .await?
            .ok_or_else(|| DiscountRejection::UnknownCode(code.to_string()))?;
        let terms = discount.terms_in(&checkout.currency, &converter)?;
        discount.check_eligibility(
            self.clock.now(),
            &terms,
            &checkout.items,
            pricing::subtotal(&checkout.items),
        )?;

        checkout.applied_discount = Some(AppliedDiscount {
            discount_id: discount.id.clone(),
            code: discount.code.clone(),
            amount: 0,
        });
        self.persist_with(checkout, &converter).await
    }

    #[instrument(skip(self))]
    pub async fn remove_discount(&self, session_id: &str) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        checkout.applied_discount = None;
        self.persist(checkout).await
    }

    /// Switch the cart currency, converting every frozen unit price
    #[instrument(skip(self))]
    pub async fn change_currency(&self, session_id: &str, currency: &str) -> ShopResult<Checkout> {
        let mut checkout = self.load(session_id).await?;
        let converter = load_converter(&*self.store).await?;
        let target = converter.resolve(currency)?.code.clone();
        if target == checkout.currency {
            return self.persist_with(checkout, &converter).await;
        }

        for item in checkout.items.iter_mut() {
            let product = self
                .store
                .find_product_by_sku(&item.sku)
                .await?
                .ok_or_else(|| ShopError::not_found("Product", &item.sku))?;
            if !product.available_in(&target) {
                return Err(ShopError::Validation(format!(
                    "{} is not available in {}",
                    product.name, target
                )));
            }
            item.unit_price = converter.convert(item.unit_price, &checkout.currency, &target)?;
        }

        debug!(from = %checkout.currency, to = %target, "Checkout currency changed");
        checkout.currency = target;
        self.persist_with(checkout, &converter).await
    }

    /// Admin removal of a checkout that has not become an order
    #[instrument(skip(self))]
    pub async fn delete(&self, checkout_id: Uuid) -> ShopResult<()> {
        let checkout = self.store.get_checkout(checkout_id).await?;
        if checkout.status == CheckoutStatus::Completed {
            return Err(ShopError::Conflict(
                "completed checkouts belong to an order".to_string(),
            ));
        }
        self.store.delete_checkout(checkout_id).await?;
        info!(checkout_id = %checkout_id, "Checkout deleted");
        Ok(())
    }

    /// Validate, convert to an order and submit payment.
    ///
    /// The payment request is checked against the gateway before conversion,
    /// so an unsupported currency or malformed card never consumes stock.
    #[instrument(skip(self, payment), fields(provider = %payment.provider))]
    pub async fn complete(&self, session_id: &str, payment: CompleteCheckout) -> ShopResult<PaymentSubmission> {
        let checkout = self.load(session_id).await?;
        if checkout.is_empty() {
            return Err(ShopError::Conflict(
                "cannot complete a checkout with no items".to_string(),
            ));
        }
        let customer = checkout
            .customer
            .as_ref()
            .ok_or_else(|| ShopError::Validation("customer email is required".to_string()))?;
        customer.validate()?;
        if checkout.shipping_address.is_none() {
            return Err(ShopError::Validation(
                "shipping address is required".to_string(),
            ));
        }

        let gateway = self.payments.gateway(payment.provider)?;
        let mut request = PaymentRequest {
            order_id: checkout.id,
            order_number: String::new(),
            amount: checkout.totals.final_amount,
            currency: checkout.currency.clone(),
            method: payment.method,
            card: payment.card,
            phone_number: payment.phone_number,
            customer_email: Some(customer.email.clone()),
            return_url: payment.return_url,
            description: String::new(),
            idempotency_key: format!("payment-{}", checkout.id),
        };
        gateway.validate_request(&request)?;

        let order = self.converter.convert(checkout.id).await?;
        request.order_id = order.id;
        request.order_number = order.order_number.clone();
        request.amount = order.final_amount;
        request.description = format!("Order {}", order.order_number);

        self.payments.submit(order, payment.provider, request).await
    }

    /// Load a mutable checkout by session
    async fn load(&self, session_id: &str) -> ShopResult<Checkout> {
        let checkout = self
            .store
            .find_checkout_by_session(session_id)
            .await?
            .ok_or_else(|| ShopError::not_found("Checkout", session_id))?;
        checkout.ensure_active()?;
        Ok(checkout)
    }

    async fn persist(&self, checkout: Checkout) -> ShopResult<Checkout> {
        let converter = load_converter(&*self.store).await?;
        self.persist_with(checkout, &converter).await
    }

    /// Re-validate, reprice, touch and save
    async fn persist_with(
        &self,
        mut checkout: Checkout,
        converter: &CurrencyConverter,
    ) -> ShopResult<Checkout> {
        converter.resolve(&checkout.currency)?;

        for item in &checkout.items {
            let product = self
                .store
                .find_product_by_sku(&item.sku)
                .await?
                .ok_or_else(|| ShopError::not_found("Product", &item.sku))?;
            let available = product.variant(&item.sku).map(|v| v.stock).unwrap_or(0);
            if !product.active {
                return Err(ShopError::Validation(format!(
                    "{} is no longer available",
                    product.name
                )));
            }
            if item.quantity > available {
                return Err(StoreError::InsufficientStock {
                    sku: item.sku.clone(),
                    requested: item.quantity,
                    available,
                }
                .into());
            }
        }

        self.reprice(&mut checkout, converter).await?;
        checkout.touch(self.clock.now(), self.settings.ttl);
        self.store.save_active_checkout(&checkout).await?;
        Ok(checkout)
    }

    async fn reprice(&self, checkout: &mut Checkout, converter: &CurrencyConverter) -> ShopResult<()> {
        let subtotal = pricing::subtotal(&checkout.items);
        let weight = pricing::total_weight(&checkout.items);

        if let Some(option) = checkout.shipping_option.take() {
            match self.store.get_shipping_rate(&option.rate_id).await? {
                Some(rate) if rate.is_available(subtotal, &checkout.currency, converter)? => {
                    checkout.shipping_option =
                        Some(rate.option_for(subtotal, weight, &checkout.currency, converter)?);
                }
                _ => debug!(rate_id = %option.rate_id, "Shipping method no longer applies"),
            }
        }

        let terms = match &checkout.applied_discount {
            Some(applied) => match self.store.get_discount(&applied.discount_id).await? {
                Some(discount) => Some(discount.terms_in(&checkout.currency, converter)?),
                None => None,
            },
            None => None,
        };
        if terms.is_none() {
            checkout.applied_discount = None;
        }

        checkout.apply_totals(calculate_totals(
            &checkout.items,
            checkout.shipping_option.as_ref(),
            terms.as_ref(),
        ));
        Ok(())
    }
}
