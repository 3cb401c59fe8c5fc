//! # Routes
//!
//! Axum router configuration for the storefront API.

use crate::handlers::{self, SESSION_HEADER};
use crate::state::AppState;
use axum::{
    http::HeaderName,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Catalog:
///   - GET  /api/v1/products
///   - GET  /api/v1/products/{id}
///
/// - Cart (scoped by `x-session-id`):
///   - GET    /api/v1/cart
///   - DELETE /api/v1/cart
///   - POST   /api/v1/cart/items
///   - PUT    /api/v1/cart/items/{product_id}
///   - DELETE /api/v1/cart/items/{product_id}
///   - GET    /api/v1/cart/preview?currency=XXX
///
/// - Checkout and payments:
///   - POST /api/v1/checkout
///   - POST /api/v1/payments/vnpay/url
///   - POST /api/v1/payments/vnpay/confirm
///   - POST /api/v1/payments/paypal/orders
///   - POST /api/v1/payments/paypal/orders/{id}/capture
///
/// - Invoices:
///   - GET  /api/v1/invoices/{id}
///   - POST /api/v1/invoices/{id}/status
///   - POST /api/v1/invoices/{id}/cancel
pub fn create_router(state: AppState) -> Router {
    // Browsers must be able to read the issued session id
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    let payment_routes = Router::new()
        .route("/vnpay/url", post(handlers::vnpay_payment_url))
        .route("/vnpay/confirm", post(handlers::vnpay_confirm))
        .route("/paypal/orders", post(handlers::paypal_create_order))
        .route(
            "/paypal/orders/{order_id}/capture",
            post(handlers::paypal_capture_order),
        );

    let invoice_routes = Router::new()
        .route("/{invoice_id}", get(handlers::get_invoice))
        .route("/{invoice_id}/status", post(handlers::update_invoice_status))
        .route("/{invoice_id}/cancel", post(handlers::cancel_invoice));

    let api_routes = Router::new()
        .route("/products", get(handlers::list_products))
        .route("/products/{product_id}", get(handlers::get_product))
        .route("/cart", get(handlers::view_cart).delete(handlers::clear_cart))
        .route("/cart/items", post(handlers::add_item))
        .route(
            "/cart/items/{product_id}",
            put(handlers::update_item).delete(handlers::remove_item),
        )
        .route("/cart/preview", get(handlers::preview_cart))
        .route("/checkout", post(handlers::checkout))
        .nest("/payments", payment_routes)
        .nest("/invoices", invoice_routes);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
