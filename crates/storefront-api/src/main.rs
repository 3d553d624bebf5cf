//! # Storefront RS
//!
//! Checkout-to-order engine.
//!
//! ## Usage
//!
//! ```bash
//! # Optional providers
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export MOBILEPAY_CLIENT_ID=...
//!
//! # Run the server
//! storefront
//! ```

use storefront_api::{routes, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let state = AppState::new().await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment providers: {:?}", state.payments.gateways().providers());

    // Expiry sweeper runs beside the server for its whole lifetime
    let sweeper = state.sweeper.clone().spawn();

    let app = routes::create_router(state);

    info!("🛒 Storefront starting on http://{}", addr);

    if !is_prod {
        info!("📝 Health: http://{}/health", addr);
        info!("🧺 Checkout: GET http://{}/api/v1/checkout", addr);
        info!("🔔 Webhooks: POST http://{}/webhooks/{{stripe,mobilepay}}", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Storefront stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn print_banner() {
    println!(
        r#"
  🛒 Storefront RS
  ━━━━━━━━━━━━━━━━━━━━━━━
  Checkout-to-order engine
  Version: {}
  
"#,
        env!("CARGO_PKG_VERSION")
    );
}
