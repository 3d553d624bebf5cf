//! # storefront-api
//!
//! HTTP API layer for storefront-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Session-cookie checkout endpoints
//! - Order reads and admin fulfillment/payment operations
//! - Webhook handlers for Stripe and MobilePay
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/checkout` | Current checkout (sets the session cookie) |
//! | POST | `/api/v1/checkout/items` | Add item |
//! | PUT/DELETE | `/api/v1/checkout/items/{sku}` | Change quantity / remove |
//! | PUT | `/api/v1/checkout/customer` | Buyer contact details |
//! | PUT | `/api/v1/checkout/shipping-address` | Shipping address |
//! | GET | `/api/v1/checkout/shipping-options` | Available shipping rates |
//! | POST/DELETE | `/api/v1/checkout/discount` | Apply / remove a code |
//! | PUT | `/api/v1/checkout/currency` | Change currency |
//! | POST | `/api/v1/checkout/complete` | Place order and pay |
//! | GET | `/api/v1/orders/{id}` | Read an order |
//! | POST | `/api/v1/admin/payments/{id}/refund` | Refund (admin) |
//! | POST | `/webhooks/stripe` | Stripe webhook |
//! | POST | `/webhooks/mobilepay` | MobilePay webhook |
//!
//! See [`routes::create_router`] for the full list.

pub mod handlers;
pub mod notify;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState, WebhookSecrets};
