//! # Storefront Checkout
//!
//! Cart, checkout and payment settlement server.
//!
//! ## Usage
//!
//! ```bash
//! # Optional gateways
//! export VNPAY_TMN_CODE=...
//! export VNPAY_HASH_SECRET=...
//! export VNPAY_RETURN_URL=https://shop.example/checkout/vnpay-return
//! export PAYPAL_CLIENT_ID=...
//! export PAYPAL_CLIENT_SECRET=...
//! export PAYPAL_RETURN_URL=https://shop.example/checkout/paypal-return
//! export PAYPAL_CANCEL_URL=https://shop.example/cart
//!
//! # Run the server (LOG_FORMAT=json for structured logs)
//! storefront-checkout
//! ```

use shop_api::{routes, spawn_sweeper, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Print banner
    print_banner();

    // Initialize application state
    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Products loaded: {}", state.catalog.products.len());
    info!("Payment channels: {:?}", state.channels());

    let _sweeper = spawn_sweeper(state.clone());

    // Create router
    let app = routes::create_router(state);

    info!("Storefront checkout starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Cart: http://{}/api/v1/cart", addr);
        info!("Checkout: POST http://{}/api/v1/checkout", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to one JSON object per line
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn print_banner() {
    println!(
        r#"
  Storefront Checkout
  ━━━━━━━━━━━━━━━━━━━━━━━
  Cart, invoices and payment settlement
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
