//! # Cart
//!
//! Session-scoped shopping cart. Only unit price, tax rate and quantity are
//! stored; tax, line totals and cart totals are recomputed on every read.

use crate::currency::CurrencyConverter;
use crate::error::{CheckoutError, CheckoutResult};
use crate::inventory::InventoryLedger;
use crate::product::{Currency, PriceLookup, Product};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A line in a cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_before_tax: Decimal,
    pub tax_rate_percent: Decimal,
    pub currency: Currency,
}

impl CartLine {
    /// Create a line from a catalog product
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            quantity,
            unit_price_before_tax: product.price.amount,
            tax_rate_percent: product.tax_rate_percent,
            currency: product.price.currency,
        }
    }

    /// unit price x quantity
    pub fn subtotal(&self) -> Decimal {
        self.unit_price_before_tax * Decimal::from(self.quantity)
    }

    /// Tax for the whole line, rounded to the currency's precision
    pub fn tax_amount(&self) -> Decimal {
        self.currency.round(
            self.unit_price_before_tax * self.tax_rate_percent / Decimal::ONE_HUNDRED
                * Decimal::from(self.quantity),
        )
    }

    /// subtotal + tax
    pub fn line_total(&self) -> Decimal {
        self.subtotal() + self.tax_amount()
    }
}

/// The stored cart for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Cart {
    fn default() -> Self {
        Self::new()
    }
}

impl Cart {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Currency shared by every line (None for an empty cart)
    pub fn currency(&self) -> Option<Currency> {
        self.lines.first().map(|l| l.currency)
    }

    /// Check if cart is empty
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Find the line for a product
    pub fn line(&self, product_id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Quantity already in the cart for a product
    pub fn quantity_of(&self, product_id: &str) -> u32 {
        self.line(product_id).map(|l| l.quantity).unwrap_or(0)
    }

    /// Insert or replace the line for `product` with an absolute quantity,
    /// refreshing the price snapshot from the product.
    pub fn put(&mut self, product: &Product, quantity: u32) -> CheckoutResult<()> {
        if quantity == 0 {
            return Err(CheckoutError::Validation(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        if let Some(currency) = self.currency() {
            let is_only_line = self.lines.len() == 1 && self.lines[0].product_id == product.id;
            if currency != product.price.currency && !is_only_line {
                return Err(CheckoutError::Validation(format!(
                    "Cart is priced in {}, {} is priced in {}",
                    currency, product.id, product.price.currency
                )));
            }
        }

        let line = CartLine::from_product(product, quantity);
        match self.lines.iter_mut().find(|l| l.product_id == product.id) {
            Some(existing) => *existing = line,
            None => self.lines.push(line),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Remove a product's line; returns false when it was not in the cart
    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        self.updated_at = Utc::now();
        self.lines.len() != before
    }

    /// Remove every line
    pub fn clear(&mut self) {
        self.lines.clear();
        self.updated_at = Utc::now();
    }

    /// Derived view with every total recomputed
    pub fn view(&self) -> CartView {
        let lines: Vec<CartLineView> = self.lines.iter().map(CartLineView::from).collect();
        let sub_total = self.lines.iter().map(CartLine::subtotal).sum();
        let tax_total = self.lines.iter().map(CartLine::tax_amount).sum();
        CartView {
            item_count: self.lines.iter().map(|l| l.quantity).sum(),
            currency: self.currency(),
            sub_total,
            tax_total,
            total: sub_total + tax_total,
            source_currency: None,
            exchange_rate: None,
            lines,
        }
    }
}

/// A cart line with its derived amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLineView {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_before_tax: Decimal,
    pub tax_rate_percent: Decimal,
    pub tax_amount: Decimal,
    pub line_total: Decimal,
}

impl From<&CartLine> for CartLineView {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            sku: line.sku.clone(),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price_before_tax: line.unit_price_before_tax,
            tax_rate_percent: line.tax_rate_percent,
            tax_amount: line.tax_amount(),
            line_total: line.line_total(),
        }
    }
}

/// Priced view of a cart, in the cart's own currency or a preview currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub item_count: u32,
    pub currency: Option<Currency>,
    pub sub_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    /// Currency the cart is actually priced in, set on previews only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_currency: Option<Currency>,
    /// Multiplier applied to every amount of a preview
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<Decimal>,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The view's currency, or `EmptyCart` when there are no lines
    pub fn require_currency(&self) -> CheckoutResult<Currency> {
        self.currency.ok_or(CheckoutError::EmptyCart)
    }

    /// Re-express every amount in `target`. Nothing stored changes.
    pub async fn in_currency(
        &self,
        converter: &CurrencyConverter,
        target: Currency,
    ) -> CheckoutResult<CartView> {
        let Some(source) = self.currency else {
            return Ok(CartView {
                currency: Some(target),
                ..self.clone()
            });
        };
        let rate = converter.rate(source, target).await?;
        let convert = |amount: Decimal| target.round(amount * rate);

        Ok(CartView {
            lines: self
                .lines
                .iter()
                .map(|l| CartLineView {
                    unit_price_before_tax: convert(l.unit_price_before_tax),
                    tax_amount: convert(l.tax_amount),
                    line_total: convert(l.line_total),
                    ..l.clone()
                })
                .collect(),
            item_count: self.item_count,
            currency: Some(target),
            sub_total: convert(self.sub_total),
            tax_total: convert(self.tax_total),
            total: convert(self.total),
            source_currency: Some(source),
            exchange_rate: Some(rate),
        })
    }
}

/// Session store seam. Carts are ephemeral and keyed by an opaque session id.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Current cart, or an empty one
    async fn load(&self, session_id: &str) -> CheckoutResult<Cart>;

    /// Replace the session's cart
    async fn save(&self, session_id: &str, cart: Cart) -> CheckoutResult<()>;

    /// Forget the session's cart
    async fn clear(&self, session_id: &str) -> CheckoutResult<()>;
}

/// In-process session store; carts idle longer than `ttl` are dropped.
#[derive(Debug)]
pub struct InMemoryCartStore {
    carts: DashMap<String, Cart>,
    ttl: Duration,
}

impl InMemoryCartStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            carts: DashMap::new(),
            ttl,
        }
    }

    fn is_expired(&self, cart: &Cart, now: DateTime<Utc>) -> bool {
        cart.updated_at + self.ttl < now
    }

    /// Drop every expired cart; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.carts.len();
        self.carts.retain(|_, cart| !self.is_expired(cart, now));
        before - self.carts.len()
    }
}

impl Default for InMemoryCartStore {
    fn default() -> Self {
        Self::new(Duration::hours(2))
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load(&self, session_id: &str) -> CheckoutResult<Cart> {
        let now = Utc::now();
        let cart = self.carts.get(session_id).map(|c| c.clone());
        match cart {
            Some(cart) if self.is_expired(&cart, now) => {
                self.carts.remove(session_id);
                debug!(session_id, "Cart expired");
                Ok(Cart::new())
            }
            Some(cart) => Ok(cart),
            None => Ok(Cart::new()),
        }
    }

    async fn save(&self, session_id: &str, cart: Cart) -> CheckoutResult<()> {
        if cart.is_empty() {
            self.carts.remove(session_id);
        } else {
            self.carts.insert(session_id.to_string(), cart);
        }
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> CheckoutResult<()> {
        self.carts.remove(session_id);
        Ok(())
    }
}

/// Cart operations exposed to callers
#[derive(Clone)]
pub struct CartService {
    catalog: Arc<dyn PriceLookup>,
    ledger: Arc<dyn InventoryLedger>,
    carts: Arc<dyn CartStore>,
    converter: Arc<CurrencyConverter>,
}

impl CartService {
    pub fn new(
        catalog: Arc<dyn PriceLookup>,
        ledger: Arc<dyn InventoryLedger>,
        carts: Arc<dyn CartStore>,
        converter: Arc<CurrencyConverter>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            carts,
            converter,
        }
    }

    /// Advisory stock check; checkout re-checks authoritatively
    async fn ensure_available(&self, product: &Product, requested: u32) -> CheckoutResult<()> {
        let available = self
            .ledger
            .available(&product.location_id, &product.id)
            .await?;
        if requested > available {
            return Err(CheckoutError::OutOfStock {
                product_id: product.id.clone(),
                requested,
                available,
            });
        }
        Ok(())
    }

    /// Add `quantity` units of a product, merging with an existing line
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        session_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> CheckoutResult<CartView> {
        if quantity == 0 {
            return Err(CheckoutError::Validation(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        let product = self.catalog.current(product_id).await?;
        let mut cart = self.carts.load(session_id).await?;

        let requested = cart
            .quantity_of(product_id)
            .checked_add(quantity)
            .ok_or_else(|| CheckoutError::Validation("Quantity too large".to_string()))?;
        self.ensure_available(&product, requested).await?;

        cart.put(&product, requested)?;
        let view = cart.view();
        self.carts.save(session_id, cart).await?;

        info!(session_id, product_id, quantity = requested, "Cart line added");
        Ok(view)
    }

    /// Set an existing line's quantity
    #[instrument(skip(self))]
    pub async fn update(
        &self,
        session_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> CheckoutResult<CartView> {
        if quantity == 0 {
            return Err(CheckoutError::Validation(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        let mut cart = self.carts.load(session_id).await?;
        if cart.line(product_id).is_none() {
            return Err(CheckoutError::ProductNotFound {
                product_id: product_id.to_string(),
            });
        }
        let product = self.catalog.current(product_id).await?;
        self.ensure_available(&product, quantity).await?;

        cart.put(&product, quantity)?;
        let view = cart.view();
        self.carts.save(session_id, cart).await?;
        Ok(view)
    }

    /// Remove a product's line
    #[instrument(skip(self))]
    pub async fn remove(&self, session_id: &str, product_id: &str) -> CheckoutResult<CartView> {
        let mut cart = self.carts.load(session_id).await?;
        if !cart.remove(product_id) {
            return Err(CheckoutError::ProductNotFound {
                product_id: product_id.to_string(),
            });
        }
        let view = cart.view();
        self.carts.save(session_id, cart).await?;
        Ok(view)
    }

    /// Empty the cart
    pub async fn clear(&self, session_id: &str) -> CheckoutResult<()> {
        self.carts.clear(session_id).await
    }

    /// Stored cart, for checkout
    pub async fn snapshot(&self, session_id: &str) -> CheckoutResult<Cart> {
        self.carts.load(session_id).await
    }

    /// Current view in the cart's own currency
    pub async fn view(&self, session_id: &str) -> CheckoutResult<CartView> {
        Ok(self.carts.load(session_id).await?.view())
    }

    /// Estimate in another currency without touching the stored cart
    pub async fn preview_in_currency(
        &self,
        session_id: &str,
        target: Currency,
    ) -> CheckoutResult<CartView> {
        self.view(session_id)
            .await?
            .in_currency(&self.converter, target)
            .await
    }
}

impl std::fmt::Debug for CartService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartService").finish_non_exhaustive()
    }
}
