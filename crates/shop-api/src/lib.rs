//! # shop-api
//!
//! HTTP API layer for storefront-checkout-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Session-scoped cart endpoints
//! - Checkout, VNPay and PayPal settlement endpoints
//! - Invoice lookup and staff workflow endpoints
//! - Background sweep of idle carts and abandoned invoices
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/products` | List products |
//! | GET | `/api/v1/products/{id}` | Get product |
//! | GET / DELETE | `/api/v1/cart` | View / clear cart |
//! | POST | `/api/v1/cart/items` | Add to cart |
//! | PUT / DELETE | `/api/v1/cart/items/{product_id}` | Update / remove line |
//! | GET | `/api/v1/cart/preview?currency=XXX` | Currency preview |
//! | POST | `/api/v1/checkout` | Invoice without a gateway |
//! | POST | `/api/v1/payments/vnpay/url` | VNPay redirect URL |
//! | POST | `/api/v1/payments/vnpay/confirm` | Verify VNPay return, settle |
//! | POST | `/api/v1/payments/paypal/orders` | Create PayPal order |
//! | POST | `/api/v1/payments/paypal/orders/{id}/capture` | Capture, settle |
//! | GET | `/api/v1/invoices/{id}` | Get invoice |
//! | POST | `/api/v1/invoices/{id}/status` | Staff status change |
//! | POST | `/api/v1/invoices/{id}/cancel` | Cancel, restore stock |

pub mod handlers;
pub mod notify;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use routes::create_router;
pub use state::{AppConfig, AppState, ShopSeed};
pub use sweeper::spawn_sweeper;
