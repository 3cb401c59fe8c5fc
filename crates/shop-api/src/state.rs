//! # Application State
//!
//! Shared state for the Axum application.
//! Wires the catalog, stock ledger, cart store and invoice store into one
//! `SettlementOrchestrator`, and holds whichever payment gateways are
//! configured.

use crate::notify::WebhookNotifier;
use rust_decimal::Decimal;
use serde::Deserialize;
use shop_core::{
    CartService, CheckoutError, Currency, CurrencyConverter, InMemoryCartStore,
    InMemoryInventoryLedger, InMemoryInvoiceStore, InventoryRecord, InvoiceFactory,
    InvoiceNotifier, LoggingNotifier, Product, ProductCatalog, SettlementOrchestrator,
    StaticRateSource,
};
use shop_paypal::PaypalGateway;
use shop_vnpay::VnpayGateway;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_SHOP_CONFIG: &str = "config/shop.toml";

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of the storefront
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Explicit seed file; when unset the usual locations are searched
    pub shop_config: Option<PathBuf>,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
    /// Unpaid bank-transfer invoices older than this are cancelled
    pub abandoned_after: chrono::Duration,
    /// Idle carts older than this are dropped
    pub cart_ttl: chrono::Duration,
    /// How long fetched exchange rates are reused
    pub rate_cache: Duration,
    /// Receives a JSON copy of every new invoice
    pub notify_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            base_url: std::env::var("BASE_URL").unwrap_or(defaults.base_url),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            shop_config: std::env::var("SHOP_CONFIG").ok().map(PathBuf::from),
            sweep_interval: env_parse("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            abandoned_after: env_parse("ABANDONED_AFTER_MINUTES")
                .map(chrono::Duration::minutes)
                .unwrap_or(defaults.abandoned_after),
            cart_ttl: env_parse("CART_TTL_MINUTES")
                .map(chrono::Duration::minutes)
                .unwrap_or(defaults.cart_ttl),
            rate_cache: env_parse("RATE_CACHE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_cache),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
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
            shop_config: None,
            sweep_interval: Duration::from_secs(300),
            abandoned_after: chrono::Duration::minutes(30),
            cart_ttl: chrono::Duration::minutes(120),
            rate_cache: Duration::from_secs(600),
            notify_webhook_url: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

/// Errors raised while loading the shop seed
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid shop seed: {0}")]
    Invalid(#[from] CheckoutError),
}

/// Catalog, opening stock and display exchange rates
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopSeed {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub inventory: Vec<InventoryRecord>,
    /// VND per one unit of each listed currency
    #[serde(default)]
    pub exchange_rates: HashMap<String, Decimal>,
}

impl ShopSeed {
    pub fn from_toml(toml_str: &str, path: &str) -> Result<Self, SeedError> {
        let seed: ShopSeed = toml::from_str(toml_str).map_err(|source| SeedError::Parse {
            path: path.to_string(),
            source,
        })?;
        seed.catalog().validate()?;
        seed.rate_source()?;
        Ok(seed)
    }

    /// Read an explicit file, or search the usual locations
    pub fn load(explicit: Option<&Path>) -> Result<Self, SeedError> {
        if let Some(path) = explicit {
            return Self::read(path);
        }

        let config_paths = [
            DEFAULT_SHOP_CONFIG,
            "../config/shop.toml",
            "../../config/shop.toml",
        ];
        for path in config_paths {
            let path = Path::new(path);
            if path.exists() {
                return Self::read(path);
            }
        }

        warn!("No shop seed found, starting with an empty catalog");
        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self, SeedError> {
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
            path: shown.clone(),
            source,
        })?;
        let seed = Self::from_toml(&content, &shown)?;
        info!(
            path = %shown,
            products = seed.products.len(),
            stock_rows = seed.inventory.len(),
            "Loaded shop seed"
        );
        Ok(seed)
    }

    pub fn catalog(&self) -> ProductCatalog {
        ProductCatalog {
            products: self.products.clone(),
        }
    }

    pub fn rate_source(&self) -> Result<StaticRateSource, CheckoutError> {
        self.exchange_rates
            .iter()
            .try_fold(StaticRateSource::default(), |source, (code, rate)| {
                let currency: Currency = code.parse()?;
                Ok(source.with_rate(currency, *rate))
            })
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Cart, checkout and settlement entry point
    pub orchestrator: Arc<SettlementOrchestrator>,
    /// Product catalog
    pub catalog: Arc<ProductCatalog>,
    /// Session carts, purged by the sweeper
    pub cart_store: Arc<InMemoryCartStore>,
    /// Bank-redirect gateway, when configured
    pub vnpay: Option<Arc<VnpayGateway>>,
    /// Wallet gateway, when configured
    pub paypal: Option<Arc<PaypalGateway>>,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Build from the environment: config, seed file and whichever gateways are set up
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let seed = ShopSeed::load(config.shop_config.as_deref())?;
        let mut state = Self::build(config, seed)?;

        match VnpayGateway::from_env() {
            Ok(gateway) => state = state.with_vnpay(gateway),
            Err(e) => warn!(error = %e, "VNPay not configured, its endpoints will answer 503"),
        }
        match PaypalGateway::from_env() {
            Ok(gateway) => state = state.with_paypal(gateway),
            Err(e) => warn!(error = %e, "PayPal not configured, its endpoints will answer 503"),
        }

        Ok(state)
    }

    /// Wire the in-process stores from a seed, without gateways
    pub fn build(config: AppConfig, seed: ShopSeed) -> anyhow::Result<Self> {
        let catalog = Arc::new(seed.catalog());
        let ledger = Arc::new(InMemoryInventoryLedger::from_records(seed.inventory.clone()));
        let invoices = Arc::new(InMemoryInvoiceStore::new());
        let cart_store = Arc::new(InMemoryCartStore::new(config.cart_ttl));
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(seed.rate_source()?),
            config.rate_cache,
        ));

        let notifier: Arc<dyn InvoiceNotifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => Arc::new(LoggingNotifier),
        };

        let carts = Arc::new(CartService::new(
            catalog.clone(),
            ledger.clone(),
            cart_store.clone(),
            converter,
        ));
        let factory = Arc::new(InvoiceFactory::new(
            catalog.clone(),
            ledger.clone(),
            invoices.clone(),
        ));
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            carts, factory, invoices, ledger, notifier,
        ));

        Ok(Self {
            orchestrator,
            catalog,
            cart_store,
            vnpay: None,
            paypal: None,
            config,
        })
    }

    /// Builder: enable the VNPay endpoints
    pub fn with_vnpay(mut self, gateway: VnpayGateway) -> Self {
        self.vnpay = Some(Arc::new(gateway));
        self
    }

    /// Builder: enable the PayPal endpoints
    pub fn with_paypal(mut self, gateway: PaypalGateway) -> Self {
        self.paypal = Some(Arc::new(gateway));
        self
    }

    /// Names of the configured payment channels
    pub fn channels(&self) -> Vec<&'static str> {
        let mut channels = vec!["CASH_ON_DELIVERY"];
        if self.vnpay.is_some() {
            channels.push("VNPAY");
        }
        if self.paypal.is_some() {
            channels.push("PAYPAL");
        }
        channels
    }
}
