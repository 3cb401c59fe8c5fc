//! # Product Types
//!
//! Money and catalog types for the storefront.
//! Products are loaded from `config/shop.toml`.

use crate::error::{CheckoutError, CheckoutResult};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Location used when a product does not name its fulfilling warehouse
pub const DEFAULT_LOCATION: &str = "main";

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    VND,
    USD,
    EUR,
    GBP,
    JPY,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::VND => "VND",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (VND and JPY have 0 decimals, the rest have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::VND | Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Round to this currency's precision, half away from zero
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimal_places(), RoundingStrategy::MidpointAwayFromZero)
    }

    /// Convert a decimal amount to the smallest currency unit (cents, etc.)
    pub fn to_minor_units(&self, amount: Decimal) -> CheckoutResult<i64> {
        let scaled = self.round(amount) * Decimal::from(10_i64.pow(self.decimal_places()));
        scaled.to_i64().ok_or_else(|| {
            CheckoutError::Validation(format!("Amount {} out of range for {}", amount, self))
        })
    }

    /// One minor unit, the tolerance used when comparing rounded totals
    pub fn minor_unit(&self) -> Decimal {
        Decimal::new(1, self.decimal_places())
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::VND
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VND" => Ok(Currency::VND),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            other => Err(CheckoutError::Validation(format!(
                "Unknown currency code: {}",
                other
            ))),
        }
    }
}

/// Price in major units (e.g. 10.50 USD)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Price {
    /// Create a price, rounded to the currency's precision
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: currency.round(amount),
            currency,
        }
    }
}

/// A physical product in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Unique product identifier (e.g., "kettle-01")
    pub id: String,

    /// Stock keeping unit
    pub sku: String,

    /// Display name
    pub name: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// Unit price before tax
    pub price: Price,

    /// Tax rate in percent (0-100)
    #[serde(default)]
    pub tax_rate_percent: Decimal,

    /// Warehouse that fulfils this product
    #[serde(default = "default_location")]
    pub location_id: String,

    /// Whether this product is active and available for purchase
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

impl Product {
    /// Create a new product sold from the default location
    pub fn new(
        id: impl Into<String>,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Price,
        tax_rate_percent: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            sku: sku.into(),
            name: name.into(),
            description: String::new(),
            price,
            tax_rate_percent,
            location_id: default_location(),
            active: true,
        }
    }

    /// Builder: set fulfilling location
    pub fn at_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = location_id.into();
        self
    }

    /// Builder: mark as withdrawn from sale
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Reject prices and tax rates outside their legal range
    pub fn validate(&self) -> CheckoutResult<()> {
        if self.price.amount.is_sign_negative() {
            return Err(CheckoutError::Validation(format!(
                "Product {} has a negative price",
                self.id
            )));
        }
        if self.tax_rate_percent < Decimal::ZERO || self.tax_rate_percent > Decimal::ONE_HUNDRED {
            return Err(CheckoutError::Validation(format!(
                "Product {} tax rate must be within 0-100",
                self.id
            )));
        }
        Ok(())
    }
}

/// Current price lookup used to re-price carts.
///
/// Implemented by the in-process catalog; a catalog service client would
/// implement the same trait.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// Current product record, or `ProductNotFound` when unknown or inactive
    async fn current(&self, product_id: &str) -> CheckoutResult<Product>;
}

/// Product catalog (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCatalog {
    pub products: Vec<Product>,
}

impl ProductCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            products: Vec::new(),
        }
    }

    /// Add a product to the catalog
    pub fn add(&mut self, product: Product) {
        self.products.push(product);
    }

    /// Builder: add a product
    pub fn with_product(mut self, product: Product) -> Self {
        self.add(product);
        self
    }

    /// Find a product by ID
    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Get all active products
    pub fn active_products(&self) -> impl Iterator<Item = &Product> {
        self.products.iter().filter(|p| p.active)
    }

    /// Validate every product in the catalog
    pub fn validate(&self) -> CheckoutResult<()> {
        self.products.iter().try_for_each(Product::validate)
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

#[async_trait]
impl PriceLookup for ProductCatalog {
    async fn current(&self, product_id: &str) -> CheckoutResult<Product> {
        self.get(product_id)
            .filter(|p| p.active)
            .cloned()
            .ok_or_else(|| CheckoutError::ProductNotFound {
                product_id: product_id.to_string(),
            })
    }
}
