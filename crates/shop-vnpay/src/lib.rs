//! # shop-vnpay
//!
//! VNPay bank-redirect gateway for storefront-checkout-rs.
//!
//! 1. **create_payment_url** - signs the cart total into a VNPay redirect URL
//!    (VND only, 15 minute expiry). Nothing is written locally.
//! 2. **verify_callback** - authenticates the parameters VNPay sends back
//!    and yields a `VerifiedCallback`, which is the gateway's
//!    `PaymentConfirmer`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shop_vnpay::VnpayGateway;
//!
//! let gateway = VnpayGateway::from_env()?;
//!
//! let quote = orchestrator.quote(&session_id).await?;
//! let redirect = gateway.create_payment_url(&quote, &orchestrator.preview_code(), &client_ip, Utc::now())?;
//! // Redirect user to redirect.redirect_url
//!
//! // Back on the return URL:
//! let callback = gateway.verify_callback(&query_params)?;
//! let invoice = orchestrator.settle(&session_id, &callback, customer).await?;
//! ```

pub mod config;
pub mod gateway;
pub mod signing;

// Re-exports
pub use config::VnpayConfig;
pub use gateway::{VerifiedCallback, VnpayGateway};
