//! # shop-paypal
//!
//! PayPal wallet gateway for storefront-checkout-rs.
//!
//! 1. **create_order** - creates a remote Orders v2 order for the cart total
//!    and returns the buyer approval URL. Nothing is written locally.
//! 2. **capture_confirmer** - wraps an approved order id in a
//!    `PaymentConfirmer`; the orchestrator captures through it and only then
//!    creates the invoice.
//!
//! Bearer tokens come from the client-credentials grant and are cached until
//! a minute before expiry; a 401 drops the cached token and retries once.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shop_paypal::PaypalGateway;
//!
//! let gateway = PaypalGateway::from_env()?;
//!
//! let quote = orchestrator.quote(&session_id).await?;
//! let redirect = gateway.create_order(&quote, &orchestrator.preview_code()).await?;
//! // Redirect buyer to redirect.redirect_url
//!
//! // After approval:
//! let invoice = orchestrator
//!     .settle(&session_id, &gateway.capture_confirmer(order_id), customer)
//!     .await?;
//! ```

pub mod config;
pub mod orders;
pub mod token;

// Re-exports
pub use config::PaypalConfig;
pub use orders::{CapturedPayment, PaypalCapture, PaypalGateway};
pub use token::TokenCache;
