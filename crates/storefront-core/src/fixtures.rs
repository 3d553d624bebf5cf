//! Shared wiring for service tests: a seeded `MemoryStore`, a manual clock, a
//! recording notifier and a scriptable gateway.

use crate::cart::{CheckoutService, CheckoutSettings, CompleteCheckout};
use crate::catalog::{Product, ProductVariant};
use crate::checkout::{Address, Checkout, CustomerDetails};
use crate::clock::{Clock, ManualClock};
use crate::conversion::OrderConverter;
use crate::discount::{Discount, DiscountMethod};
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{
    CardDetails, GatewayReceipt, PaymentAdjustment, PaymentGateway, PaymentGateways,
    PaymentMethod, PaymentOutcome, PaymentProvider, PaymentRequest,
};
use crate::ledger::TransactionLedger;
use crate::money::Currency;
use crate::notify::tests::RecordingNotifier;
use crate::order::{Order, PaymentStatus};
use crate::orders::OrderService;
use crate::payments::PaymentService;
use crate::shipping::ShippingRate;
use crate::store::{CatalogRepository, MemoryStore, OrderRepository};
use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    Capture,
    Authorize,
    RequireAction,
    Decline,
}

pub(crate) struct ScriptedGateway {
    script: Mutex<Script>,
    counter: AtomicUsize,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            script: Mutex::new(Script::Capture),
            counter: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn receipt(&self, prefix: &str, adjustment: &PaymentAdjustment) -> GatewayReceipt {
        GatewayReceipt {
            transaction_id: self.next_id(prefix),
            amount: adjustment.amount,
            raw: serde_json::json!({ "payment": adjustment.payment_id }),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mock
    }

    fn supported_currencies(&self) -> Vec<String> {
        vec!["USD".into(), "DKK".into(), "EUR".into()]
    }

    fn supported_methods(&self) -> Vec<PaymentMethod> {
        vec![PaymentMethod::Card, PaymentMethod::Wallet]
    }

    async fn process_payment(&self, _request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let script = *self.script.lock().unwrap();
        let payment_id = self.next_id("pay");
        let (status, requires_action) = match script {
            Script::Capture => (PaymentStatus::Captured, false),
            Script::Authorize => (PaymentStatus::Authorized, false),
            Script::RequireAction => (PaymentStatus::Pending, true),
            Script::Decline => {
                return Err(PaymentError::PaymentDeclined {
                    reason: "card_declined".into(),
                })
            }
        };
        Ok(PaymentOutcome {
            action_url: requires_action.then(|| format!("https://pay.test/{payment_id}")),
            payment_id,
            status,
            requires_action,
            raw: serde_json::Value::Null,
        })
    }

    async fn verify_payment(&self, payment_id: &str) -> PaymentResult<PaymentOutcome> {
        Ok(PaymentOutcome {
            payment_id: payment_id.to_string(),
            status: PaymentStatus::Pending,
            requires_action: false,
            action_url: None,
            raw: serde_json::Value::Null,
        })
    }

    async fn capture_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        Ok(self.receipt("cap", adjustment))
    }

    async fn refund_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        Ok(self.receipt("re", adjustment))
    }

    async fn cancel_payment(&self, adjustment: &PaymentAdjustment) -> PaymentResult<GatewayReceipt> {
        Ok(self.receipt("void", adjustment))
    }

    async fn force_approve(&self, _payment_id: &str) -> PaymentResult<()> {
        Ok(())
    }
}

pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: Arc<TransactionLedger>,
    pub payments: Arc<PaymentService>,
    pub converter: OrderConverter,
    pub checkout: CheckoutService,
    pub orders: OrderService,
}

pub(crate) async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let rate = |s: &str| Decimal::from_str(s).unwrap();

    store
        .put_currency(Currency::new("USD", Decimal::ONE).as_default().with_symbol("$"))
        .await;
    store
        .put_currency(Currency::new("DKK", rate("6.8")).with_symbol("kr"))
        .await;
    store
        .put_currency(Currency::new("EUR", rate("0.92")).with_symbol("€"))
        .await;
    store
        .put_currency(Currency::new("JPY", rate("151.5")).with_decimal_places(0))
        .await;

    store
        .put_product(
            Product::new("tshirt", "T-Shirt")
                .with_variant(ProductVariant::new("tshirt-m", "TSHIRT-M", 1999, 50).with_weight(200)),
        )
        .await;
    store
        .put_product(
            Product::new("jacket", "Jacket")
                .with_variant(ProductVariant::new("jacket-l", "JACKET-L", 15000, 5).with_weight(1200)),
        )
        .await;
    store
        .put_product(
            Product::new("mug", "Mug")
                .with_currencies(&["USD"])
                .with_variant(ProductVariant::new("mug-std", "MUG", 1299, 20).with_weight(400)),
        )
        .await;

    store
        .put_discount(
            Discount::basket("d-save20", "SAVE20", DiscountMethod::Fixed(2000)).with_min_order(10000),
        )
        .await;
    store
        .put_discount(Discount::basket(
            "d-tenoff",
            "TENOFF",
            DiscountMethod::Percentage(Decimal::TEN),
        ))
        .await;
    store
        .put_discount(
            Discount::basket("d-old", "OLDCODE", DiscountMethod::Fixed(500))
                .with_window(None, Some(chrono::Utc::now() - Duration::days(30))),
        )
        .await;

    store
        .put_shipping_rate(ShippingRate::new("standard", "Standard", 499).with_free_threshold(10000))
        .await;
    store
        .put_shipping_rate(ShippingRate::new("express", "Express", 1500).with_min_order(2000))
        .await;

    store
}

impl Harness {
    pub(crate) async fn new() -> Self {
        let store = Arc::new(seeded_store().await);
        let clock = Arc::new(ManualClock::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Arc::new(ScriptedGateway::new());

        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            clock.clone(),
            PaymentGateways::new().with_gateway(gateway.clone()),
            ledger.clone(),
        ));
        let checkout = CheckoutService::new(
            store.clone(),
            clock.clone(),
            CheckoutSettings::default(),
            payments.clone(),
        );

        Self {
            converter: OrderConverter::new(store.clone(), clock.clone()),
            orders: OrderService::new(store.clone(), clock.clone(), notifier.clone()),
            store,
            clock,
            notifier,
            gateway,
            ledger,
            payments,
            checkout,
        }
    }

    /// Session id of a fresh empty checkout
    pub(crate) async fn session(&self) -> String {
        self.checkout
            .get_or_create(None, None)
            .await
            .unwrap()
            .session_id
    }

    pub(crate) async fn cart_with(&self, sku: &str, quantity: u32) -> Checkout {
        let session = self.session().await;
        self.checkout.add_item(&session, sku, quantity).await.unwrap()
    }

    pub(crate) async fn convert_cart(&self, sku: &str, quantity: u32) -> Order {
        let cart = self.cart_with(sku, quantity).await;
        self.converter.convert(cart.id).await.unwrap()
    }

    /// Converted order bound to a payment id, as if a redirect payment had started
    pub(crate) async fn pending_order(&self, payment_id: &str) -> Order {
        let mut order = self.convert_cart("TSHIRT-M", 2).await;
        order.payment_provider = Some(PaymentProvider::Mock);
        order.external_payment_id = Some(payment_id.to_string());
        self.store.update_order(&order).await.unwrap();
        order
    }

    pub(crate) async fn set_stock(&self, sku: &str, stock: u32) {
        let mut product = self.store.find_product_by_sku(sku).await.unwrap().unwrap();
        for variant in product.variants.iter_mut().filter(|v| v.sku == sku) {
            variant.stock = stock;
        }
        self.store.put_product(product).await;
    }

    pub(crate) fn request_for(&self, order: &Order) -> PaymentRequest {
        PaymentRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.final_amount,
            currency: order.currency.clone(),
            method: PaymentMethod::Card,
            card: None,
            phone_number: None,
            customer_email: None,
            return_url: None,
            description: format!("Order {}", order.order_number),
            idempotency_key: format!("payment-{}", order.id),
        }
    }

    pub(crate) fn card_payment(&self) -> CompleteCheckout {
        CompleteCheckout {
            provider: PaymentProvider::Mock,
            method: PaymentMethod::Card,
            card: Some(CardDetails {
                token: Some("tok_visa".into()),
                ..CardDetails::default()
            }),
            phone_number: None,
            return_url: None,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

pub(crate) fn address() -> Address {
    Address {
        street: "1 Main St".into(),
        city: "Springfield".into(),
        state: Some("IL".into()),
        postal_code: "62701".into(),
        country: "US".into(),
    }
}

pub(crate) fn customer() -> CustomerDetails {
    CustomerDetails {
        email: "buyer@example.com".into(),
        phone: None,
        full_name: "Pat Buyer".into(),
    }
}
