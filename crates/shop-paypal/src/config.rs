//! # PayPal Configuration
//!
//! Configuration management for the PayPal integration.
//! All secrets are loaded from environment variables.

use shop_core::{CheckoutError, Currency};
use std::env;
use std::time::Duration;

/// Sandbox REST API
pub const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";

/// Live REST API
pub const LIVE_API_BASE: &str = "https://api-m.paypal.com";

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// PayPal REST API configuration
#[derive(Clone)]
pub struct PaypalConfig {
    /// REST app client id
    pub client_id: String,

    /// REST app secret
    pub client_secret: String,

    /// API base URL (sandbox, live, or a mock in tests)
    pub api_base: String,

    /// Where PayPal sends the buyer after approving
    pub return_url: String,

    /// Where PayPal sends the buyer after cancelling
    pub cancel_url: String,

    /// Currency orders are created in
    pub currency: Currency,

    /// Per-request timeout for token, create and capture calls
    pub timeout: Duration,
}

impl PaypalConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PAYPAL_CLIENT_ID`
    /// - `PAYPAL_CLIENT_SECRET`
    /// - `PAYPAL_RETURN_URL`
    /// - `PAYPAL_CANCEL_URL`
    ///
    /// Optional: `PAYPAL_API_BASE` (sandbox), `PAYPAL_TIMEOUT_SECS` (15).
    pub fn from_env() -> Result<Self, CheckoutError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let client_id = env::var("PAYPAL_CLIENT_ID").map_err(|_| {
            CheckoutError::Configuration("PAYPAL_CLIENT_ID not set".to_string())
        })?;

        let client_secret = env::var("PAYPAL_CLIENT_SECRET").map_err(|_| {
            CheckoutError::Configuration("PAYPAL_CLIENT_SECRET not set".to_string())
        })?;

        let return_url = env::var("PAYPAL_RETURN_URL").map_err(|_| {
            CheckoutError::Configuration("PAYPAL_RETURN_URL not set".to_string())
        })?;

        let cancel_url = env::var("PAYPAL_CANCEL_URL").map_err(|_| {
            CheckoutError::Configuration("PAYPAL_CANCEL_URL not set".to_string())
        })?;

        let timeout_secs = match env::var("PAYPAL_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                CheckoutError::Configuration(format!("Invalid PAYPAL_TIMEOUT_SECS: {}", raw))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        let config = Self::new(client_id, client_secret, return_url, cancel_url)
            .with_api_base(env::var("PAYPAL_API_BASE").unwrap_or_else(|_| SANDBOX_API_BASE.to_string()))
            .with_timeout(Duration::from_secs(timeout_secs));
        config.validate()?;
        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        return_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: SANDBOX_API_BASE.to_string(),
            return_url: return_url.into(),
            cancel_url: cancel_url.into(),
            currency: Currency::USD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> Result<(), CheckoutError> {
        if self.client_id.trim().is_empty() || self.client_secret.is_empty() {
            return Err(CheckoutError::Configuration(
                "PayPal client id and secret must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CheckoutError::Configuration(
                "PayPal timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if using the live API
    pub fn is_live_mode(&self) -> bool {
        self.api_base == LIVE_API_BASE
    }

    /// Absolute URL of an API path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    /// Builder: set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for PaypalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaypalConfig")
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
