//! # Application State
//!
//! Shared state for the Axum application.
//! The whole service graph is assembled here once and cloned per request.

use crate::notify::HttpNotifier;
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;
use storefront_core::{
    CatalogSeed, CheckoutService, CheckoutSettings, Clock, ExpirySweeper, LoggingNotifier,
    MemoryStore, Notifier, OrderService, PaymentGateways, PaymentProvider, PaymentService,
    SharedStore, SweeperConfig, SystemClock, TransactionLedger, MIN_SWEEP_INTERVAL,
};
use storefront_gateways::{
    MobilePayConfig, MobilePayGateway, MockGateway, StripeConfig, StripeGateway,
};
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for callbacks
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Explicit catalog seed path; the usual config locations are tried otherwise
    pub catalog_path: Option<String>,
    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
    pub checkout_ttl: Duration,
    pub sweeper: SweeperConfig,
    /// Order notification endpoint; notifications are only logged when unset
    pub notify_url: Option<String>,
    pub notify_timeout: std::time::Duration,
    /// Register the in-process mock provider (never in production)
    pub mock_gateway: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `SWEEP_INTERVAL_SECS` as a duration; zero is raised to the minimum
fn sweep_interval(secs: u64) -> std::time::Duration {
    let interval = std::time::Duration::from_secs(secs);
    if interval < MIN_SWEEP_INTERVAL {
        warn!(
            secs,
            min_secs = MIN_SWEEP_INTERVAL.as_secs(),
            "SWEEP_INTERVAL_SECS below minimum; using the minimum"
        );
        return MIN_SWEEP_INTERVAL;
    }
    interval
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let environment = env_or("ENVIRONMENT", "development");
        let is_production = environment == "production";
        let defaults = SweeperConfig::default();

        Self {
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 8080),
            base_url: env_or("BASE_URL", "http://localhost:8080"),
            catalog_path: env_opt("CATALOG_PATH"),
            cors_origins: env_opt("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            checkout_ttl: Duration::hours(env_parse("CHECKOUT_TTL_HOURS", 24)),
            sweeper: SweeperConfig {
                interval: sweep_interval(env_parse(
                    "SWEEP_INTERVAL_SECS",
                    defaults.interval.as_secs(),
                )),
                abandon_after: Duration::minutes(env_parse(
                    "ABANDON_AFTER_MINUTES",
                    defaults.abandon_after.num_minutes(),
                )),
                retention: Duration::days(env_parse(
                    "RETENTION_DAYS",
                    defaults.retention.num_days(),
                )),
            },
            notify_url: env_opt("NOTIFY_URL"),
            notify_timeout: std::time::Duration::from_secs(env_parse("NOTIFY_TIMEOUT_SECS", 10)),
            mock_gateway: !is_production && env_parse("MOCK_GATEWAY_ENABLED", true),
            environment,
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid socket address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            environment: "development".to_string(),
            catalog_path: None,
            cors_origins: Vec::new(),
            checkout_ttl: Duration::hours(24),
            sweeper: SweeperConfig::default(),
            notify_url: None,
            notify_timeout: std::time::Duration::from_secs(10),
            mock_gateway: true,
        }
    }
}

/// Webhook signing secrets, one per provider. A missing secret means the
/// provider's webhooks are accepted unverified, which only happens outside
/// production.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub stripe: Option<String>,
    pub mobilepay: Option<String>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: SharedStore,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub ledger: Arc<TransactionLedger>,
    pub sweeper: Arc<ExpirySweeper>,
    pub webhook_secrets: WebhookSecrets,
}

impl AppState {
    /// Build the production graph from the environment
    pub async fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();

        let seed = load_catalog(config.catalog_path.as_deref())?;
        let store: SharedStore = Arc::new(MemoryStore::from_seed(seed).await);

        let mut gateways = PaymentGateways::new();
        let mut secrets = WebhookSecrets::default();

        if let Some(stripe) = StripeConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to configure Stripe: {}", e))?
        {
            secrets.stripe = stripe.webhook_secret.clone();
            gateways.register(Arc::new(StripeGateway::new(stripe)?));
        }

        if let Some(mobilepay) = MobilePayConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to configure MobilePay: {}", e))?
        {
            secrets.mobilepay = mobilepay.webhook_secret.clone();
            gateways.register(Arc::new(MobilePayGateway::new(mobilepay)?));
        }

        if config.mock_gateway {
            let mock = MockGateway::new()
                .with_action_base_url(format!("{}/mock-pay", config.base_url.trim_end_matches('/')));
            gateways.register(Arc::new(mock));
        }

        if gateways.providers().is_empty() {
            warn!("No payment providers configured; checkout completion will fail");
        }

        if config.is_production() {
            for provider in gateways.providers() {
                let unsigned = match provider {
                    PaymentProvider::Stripe => secrets.stripe.is_none(),
                    PaymentProvider::MobilePay => secrets.mobilepay.is_none(),
                    PaymentProvider::Mock => false,
                };
                if unsigned {
                    anyhow::bail!("{} is enabled without a webhook secret", provider.as_str());
                }
            }
        }

        let notifier: Arc<dyn Notifier> = match &config.notify_url {
            Some(url) => Arc::new(HttpNotifier::new(url.clone(), config.notify_timeout)?),
            None => Arc::new(LoggingNotifier),
        };

        Ok(Self::build(
            config,
            store,
            Arc::new(SystemClock),
            gateways,
            notifier,
            secrets,
        ))
    }

    /// Wire the services around an existing store and provider set
    pub fn build(
        config: AppConfig,
        store: SharedStore,
        clock: Arc<dyn Clock>,
        gateways: PaymentGateways,
        notifier: Arc<dyn Notifier>,
        webhook_secrets: WebhookSecrets,
    ) -> Self {
        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            clock.clone(),
            gateways,
            ledger.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            store.clone(),
            clock.clone(),
            CheckoutSettings {
                ttl: config.checkout_ttl,
            },
            payments.clone(),
        ));
        let orders = Arc::new(OrderService::new(store.clone(), clock.clone(), notifier));
        let sweeper = Arc::new(ExpirySweeper::new(
            store.clone(),
            clock,
            config.sweeper.clone(),
        ));

        Self {
            config,
            store,
            checkout,
            orders,
            payments,
            ledger,
            sweeper,
            webhook_secrets,
        }
    }

    /// Default return URL for redirect-based payments
    pub fn return_url(&self) -> String {
        format!("{}/checkout/return", self.config.base_url.trim_end_matches('/'))
    }
}

/// Load the catalog seed from the configured path or the usual locations
fn load_catalog(explicit: Option<&str>) -> anyhow::Result<CatalogSeed> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path))?;
        return parse_catalog(path, &content);
    }

    let config_paths = [
        "config/catalog.toml",
        "../config/catalog.toml",
        "../../config/catalog.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            return parse_catalog(path, &content);
        }
    }

    warn!("No catalog found, starting with an empty store");
    Ok(CatalogSeed::default())
}

fn parse_catalog(path: &str, content: &str) -> anyhow::Result<CatalogSeed> {
    let seed = CatalogSeed::from_toml_str(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
    info!(
        path,
        products = seed.products.len(),
        currencies = seed.currencies.len(),
        discounts = seed.discounts.len(),
        shipping_rates = seed.shipping_rates.len(),
        "Catalog loaded"
    );
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ..AppConfig::default()
        };

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:3000");

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..AppConfig::default()
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_zero_sweep_interval_is_raised() {
        assert_eq!(sweep_interval(0), MIN_SWEEP_INTERVAL);
        assert_eq!(sweep_interval(60), std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_bundled_catalog_parses() {
        let content = include_str!("../../../config/catalog.toml");
        let seed = parse_catalog("config/catalog.toml", content).unwrap();
        assert!(seed.currencies.iter().any(|c| c.is_default));
        assert!(seed
            .products
            .iter()
            .flat_map(|p| p.variants.iter())
            .any(|v| v.sku == "TSHIRT-M"));
        assert!(seed.discounts.iter().any(|d| d.code == "SAVE20"));
    }

    #[test]
    fn test_missing_explicit_catalog_is_an_error() {
        assert!(load_catalog(Some("/nonexistent/catalog.toml")).is_err());
    }
}
