//! # VNPay Configuration
//!
//! Configuration management for the VNPay integration.
//! All secrets are loaded from environment variables.

use shop_core::CheckoutError;
use std::env;

/// Sandbox payment page
pub const SANDBOX_PAY_URL: &str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";

/// Minutes a payment URL stays valid
pub const DEFAULT_EXPIRE_MINUTES: i64 = 15;

/// VNPay merchant configuration
#[derive(Clone)]
pub struct VnpayConfig {
    /// Terminal (merchant) code issued by VNPay
    pub tmn_code: String,

    /// Secret used for HMAC-SHA512 signing
    pub hash_secret: String,

    /// Payment page the customer is redirected to
    pub pay_url: String,

    /// Where VNPay sends the customer back after paying
    pub return_url: String,

    /// Payment page language ("vn" or "en")
    pub locale: String,

    /// Lifetime of an issued payment URL
    pub expire_minutes: i64,
}

impl VnpayConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `VNPAY_TMN_CODE`
    /// - `VNPAY_HASH_SECRET`
    /// - `VNPAY_RETURN_URL`
    ///
    /// Optional: `VNPAY_PAY_URL` (sandbox by default), `VNPAY_LOCALE` ("vn").
    pub fn from_env() -> Result<Self, CheckoutError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let tmn_code = env::var("VNPAY_TMN_CODE")
            .map_err(|_| CheckoutError::Configuration("VNPAY_TMN_CODE not set".to_string()))?;

        let hash_secret = env::var("VNPAY_HASH_SECRET").map_err(|_| {
            CheckoutError::Configuration("VNPAY_HASH_SECRET not set".to_string())
        })?;

        let return_url = env::var("VNPAY_RETURN_URL").map_err(|_| {
            CheckoutError::Configuration("VNPAY_RETURN_URL not set".to_string())
        })?;

        let config = Self::new(tmn_code, hash_secret, return_url)
            .with_pay_url(env::var("VNPAY_PAY_URL").unwrap_or_else(|_| SANDBOX_PAY_URL.to_string()))
            .with_locale(env::var("VNPAY_LOCALE").unwrap_or_else(|_| "vn".to_string()));
        config.validate()?;
        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        tmn_code: impl Into<String>,
        hash_secret: impl Into<String>,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            tmn_code: tmn_code.into(),
            hash_secret: hash_secret.into(),
            pay_url: SANDBOX_PAY_URL.to_string(),
            return_url: return_url.into(),
            locale: "vn".to_string(),
            expire_minutes: DEFAULT_EXPIRE_MINUTES,
        }
    }

    pub fn validate(&self) -> Result<(), CheckoutError> {
        if self.tmn_code.trim().is_empty() || self.hash_secret.is_empty() {
            return Err(CheckoutError::Configuration(
                "VNPay terminal code and hash secret must not be empty".to_string(),
            ));
        }
        if !self.return_url.starts_with("http") || !self.pay_url.starts_with("http") {
            return Err(CheckoutError::Configuration(
                "VNPay pay and return URLs must be absolute".to_string(),
            ));
        }
        if !matches!(self.locale.as_str(), "vn" | "en") {
            return Err(CheckoutError::Configuration(format!(
                "VNPAY_LOCALE must be vn or en, got {}",
                self.locale
            )));
        }
        Ok(())
    }

    /// Check if pointing at the VNPay sandbox
    pub fn is_sandbox(&self) -> bool {
        self.pay_url.contains("sandbox")
    }

    /// Builder: set payment page URL
    pub fn with_pay_url(mut self, url: impl Into<String>) -> Self {
        self.pay_url = url.into();
        self
    }

    /// Builder: set payment page language
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

impl std::fmt::Debug for VnpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VnpayConfig")
            .field("tmn_code", &self.tmn_code)
            .field("pay_url", &self.pay_url)
            .field("return_url", &self.return_url)
            .field("locale", &self.locale)
            .field("expire_minutes", &self.expire_minutes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = VnpayConfig::new("DEMO1234", "SECRET", "https://shop.example/vnpay-return");
        assert!(config.is_sandbox());
        assert_eq!(config.expire_minutes, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = VnpayConfig::new("", "SECRET", "https://shop.example/return");
        assert!(config.validate().is_err());

        let config = VnpayConfig::new("DEMO1234", "SECRET", "/relative").with_locale("en");
        assert!(config.validate().is_err());

        let config = VnpayConfig::new("DEMO1234", "SECRET", "https://shop.example/r").with_locale("fr");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = VnpayConfig::new("DEMO1234", "TOPSECRET", "https://shop.example/r");
        assert!(!format!("{:?}", config).contains("TOPSECRET"));
    }

    #[test]
    fn test_from_env_missing_key() {
        env::remove_var("VNPAY_TMN_CODE");

        let result = VnpayConfig::from_env();
        assert!(result.is_err());
    }
}
