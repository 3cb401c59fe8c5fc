//! # OAuth Token Cache
//!
//! Client-credentials bearer token, reused until shortly before it expires.
//! Refreshes are serialized behind one lock so concurrent requests share a
//! single token call.

use crate::config::PaypalConfig;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shop_core::{CheckoutError, CheckoutResult};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Refresh this long before PayPal's stated expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Bearer token source for the PayPal REST API
pub struct TokenCache {
    client: Client,
    config: PaypalConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(client: Client, config: PaypalConfig) -> Self {
        Self {
            client,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Current token, fetching a new one when missing or near expiry
    pub async fn bearer(&self) -> CheckoutResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Forget the cached token (after PayPal answered 401)
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn fetch(&self) -> CheckoutResult<CachedToken> {
        let response = self
            .client
            .post(self.config.endpoint("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("Accept", "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| CheckoutError::upstream("paypal", e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            error!("PayPal rejected client credentials");
            return Err(CheckoutError::Configuration(
                "PayPal client credentials rejected".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(CheckoutError::upstream(
                "paypal",
                format!("Token request failed with HTTP {}", status),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CheckoutError::upstream("paypal", format!("Malformed token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(expires_in = token.expires_in, "Fetched PayPal access token");
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache").finish_non_exhaustive()
    }
}
