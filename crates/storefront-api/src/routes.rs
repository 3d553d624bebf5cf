//! # Routes
//!
//! Axum router configuration for the storefront API.

use crate::handlers::{self, admin, checkout, orders, webhooks};
use crate::state::AppState;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the main application router
///
/// Routes:
/// - Checkout (session cookie):
///   - GET    /api/v1/checkout
///   - DELETE /api/v1/checkout
///   - POST   /api/v1/checkout/items
///   - PUT    /api/v1/checkout/items/{sku}
///   - DELETE /api/v1/checkout/items/{sku}
///   - PUT    /api/v1/checkout/shipping-address
///   - PUT    /api/v1/checkout/billing-address
///   - PUT    /api/v1/checkout/customer
///   - GET    /api/v1/checkout/shipping-options
///   - PUT    /api/v1/checkout/shipping-method
///   - POST   /api/v1/checkout/discount
///   - DELETE /api/v1/checkout/discount
///   - PUT    /api/v1/checkout/currency
///   - POST   /api/v1/checkout/complete
///
/// - Orders:
///   - GET /api/v1/orders
///   - GET /api/v1/orders/{id}
///
/// - Admin (`x-user-role: admin`):
///   - GET  /api/v1/admin/orders?status=
///   - PUT  /api/v1/admin/orders/{id}/status
///   - POST /api/v1/admin/payments/{payment_id}/capture
///   - POST /api/v1/admin/payments/{payment_id}/cancel
///   - POST /api/v1/admin/payments/{payment_id}/refund
///   - POST /api/v1/admin/payments/{payment_id}/force-approve
///   - POST   /api/v1/admin/checkouts/sweep?force=
///   - DELETE /api/v1/admin/checkouts/{id}
///
/// - Webhooks:
///   - POST /webhooks/stripe
///   - POST /webhooks/mobilepay
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let checkout_routes = Router::new()
        .route("/", get(checkout::get_checkout).delete(checkout::clear))
        .route("/items", post(checkout::add_item))
        .route(
            "/items/{sku}",
            put(checkout::update_item).delete(checkout::remove_item),
        )
        .route("/shipping-address", put(checkout::set_shipping_address))
        .route("/billing-address", put(checkout::set_billing_address))
        .route("/customer", put(checkout::set_customer))
        .route("/shipping-options", get(checkout::shipping_options))
        .route("/shipping-method", put(checkout::set_shipping_method))
        .route(
            "/discount",
            post(checkout::apply_discount).delete(checkout::remove_discount),
        )
        .route("/currency", put(checkout::change_currency))
        .route("/complete", post(checkout::complete));

    let order_routes = Router::new()
        .route("/", get(orders::list_orders))
        .route("/{id}", get(orders::get_order));

    let admin_routes = Router::new()
        .route("/orders", get(admin::list_orders))
        .route("/orders/{id}/status", put(admin::update_order_status))
        .route("/payments/{payment_id}/capture", post(admin::capture_payment))
        .route("/payments/{payment_id}/cancel", post(admin::cancel_payment))
        .route("/payments/{payment_id}/refund", post(admin::refund_payment))
        .route(
            "/payments/{payment_id}/force-approve",
            post(admin::force_approve_payment),
        )
        .route("/checkouts/sweep", post(admin::sweep_checkouts))
        .route("/checkouts/{id}", delete(admin::delete_checkout));

    let api_routes = Router::new()
        .nest("/checkout", checkout_routes)
        .nest("/orders", order_routes)
        .nest("/admin", admin_routes)
        .layer(cors);

    // Webhooks take the raw body and sit outside CORS
    let webhook_routes = Router::new()
        .route("/stripe", post(webhooks::stripe_webhook))
        .route("/mobilepay", post(webhooks::mobilepay_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/webhooks", webhook_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Any origin when none are configured; otherwise the listed origins, with
/// credentials so the session cookie travels.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-user-role"),
        ])
        .allow_credentials(true)
}
