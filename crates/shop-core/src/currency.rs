//! # Currency Conversion
//!
//! Converts amounts between currencies using exchange rates fetched from an
//! `ExchangeRateSource` and cached for a configurable time.
//!
//! Rates are quoted against VND, the storefront's settlement currency: a rate
//! of `25_000` for USD means one US dollar buys 25,000 dong.

use crate::error::{CheckoutError, CheckoutResult};
use crate::product::Currency;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Source of exchange rates quoted against VND.
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// How many VND one unit of `currency` is worth
    async fn rate_to_vnd(&self, currency: Currency) -> CheckoutResult<Decimal>;
}

/// Fixed rate table, typically loaded from `config/shop.toml`.
#[derive(Debug, Clone, Default)]
pub struct StaticRateSource {
    rates: HashMap<Currency, Decimal>,
}

impl StaticRateSource {
    pub fn new(rates: HashMap<Currency, Decimal>) -> Self {
        Self { rates }
    }

    /// Builder: set the VND rate for a currency
    pub fn with_rate(mut self, currency: Currency, rate_to_vnd: Decimal) -> Self {
        self.rates.insert(currency, rate_to_vnd);
        self
    }
}

#[async_trait]
impl ExchangeRateSource for StaticRateSource {
    async fn rate_to_vnd(&self, currency: Currency) -> CheckoutResult<Decimal> {
        if currency == Currency::VND {
            return Ok(Decimal::ONE);
        }
        match self.rates.get(&currency) {
            Some(rate) if *rate > Decimal::ZERO => Ok(*rate),
            Some(_) => Err(CheckoutError::Configuration(format!(
                "Exchange rate for {} must be positive",
                currency
            ))),
            None => Err(CheckoutError::UnsupportedCurrency {
                currency: currency.to_string(),
                expected: "a currency with a configured exchange rate".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Currency converter with a TTL cache in front of the rate source
pub struct CurrencyConverter {
    source: Arc<dyn ExchangeRateSource>,
    cache: RwLock<HashMap<Currency, CachedRate>>,
    ttl: Duration,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn ExchangeRateSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn rate_to_vnd(&self, currency: Currency) -> CheckoutResult<Decimal> {
        if currency == Currency::VND {
            return Ok(Decimal::ONE);
        }
        if let Some(cached) = self.cache.read().await.get(&currency) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.rate);
            }
        }

        let rate = self.source.rate_to_vnd(currency).await?;
        debug!(currency = %currency, rate = %rate, "Refreshed exchange rate");
        self.cache.write().await.insert(
            currency,
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );
        Ok(rate)
    }

    /// Multiplier that turns an amount in `from` into an amount in `to`
    pub async fn rate(&self, from: Currency, to: Currency) -> CheckoutResult<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        let from_vnd = self.rate_to_vnd(from).await?;
        let to_vnd = self.rate_to_vnd(to).await?;
        Ok(from_vnd / to_vnd)
    }

    /// Convert and round to the target currency's precision
    pub async fn convert(
        &self,
        amount: Decimal,
        from: Currency,
        to: Currency,
    ) -> CheckoutResult<Decimal> {
        let rate = self.rate(from, to).await?;
        Ok(to.round(amount * rate))
    }

    /// Drop every cached rate
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}

impl std::fmt::Debug for CurrencyConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrencyConverter")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
