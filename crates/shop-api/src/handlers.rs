//! # Request Handlers
//!
//! Axum request handlers for the storefront API.
//!
//! The cart lives under the session id carried in `x-session-id`. A request
//! without one gets a fresh id, and every cart-scoped response echoes the id
//! back so the client can keep using it.

use crate::state::AppState;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, IntoResponseParts, ResponseParts},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shop_core::{
    CartView, CheckoutError, Currency, CustomerInfo, Invoice, InvoiceRequest, InvoiceStatus,
    PaymentChannel, PaymentMethod, PaymentRedirect,
};
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Session id header, read on every cart request and echoed on the response
pub const SESSION_HEADER: &str = "x-session-id";
/// Signed-in customer's email, used when the request body has none
pub const CUSTOMER_EMAIL_HEADER: &str = "x-customer-email";
/// Signed-in customer's name, used when the request body has none
pub const CUSTOMER_NAME_HEADER: &str = "x-customer-name";

const MAX_SESSION_ID_LEN: usize = 128;
const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

// =============================================================================
// Extractors
// =============================================================================

/// Cart session id from `x-session-id`, or a newly issued one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let supplied = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_SESSION_ID_LEN);

        Ok(match supplied {
            Some(id) => SessionId(id.to_string()),
            None => {
                let id = Uuid::new_v4().to_string();
                debug!(session_id = %id, "Issued new cart session");
                SessionId(id)
            }
        })
    }
}

impl IntoResponseParts for SessionId {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            res.headers_mut().insert(SESSION_HEADER, value);
        }
        Ok(res)
    }
}

/// Customer details known from the auth layer in front of the API
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerContext {
    pub email: Option<String>,
    pub name: Option<String>,
}

impl CustomerContext {
    fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        Self {
            email: read(CUSTOMER_EMAIL_HEADER),
            name: read(CUSTOMER_NAME_HEADER),
        }
    }
}

impl<S> FromRequestParts<S> for CustomerContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Customer fields as submitted; gaps are filled from `CustomerContext`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl CustomerInput {
    pub fn resolve(self, context: &CustomerContext) -> CustomerInfo {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        CustomerInfo {
            name: present(self.name)
                .or_else(|| context.name.clone())
                .unwrap_or_default(),
            email: present(self.email).or_else(|| context.email.clone()),
            phone: present(self.phone).unwrap_or_default(),
            address: present(self.address).unwrap_or_default(),
        }
    }
}

/// Add-to-cart request
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Set-quantity request
#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

/// `?currency=XXX`
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub currency: String,
}

/// Checkout without a gateway round trip
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub payment_channel: PaymentChannel,
    /// Defaults to the channel's own method
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub customer: CustomerInput,
}

/// Parameters VNPay appended to the return URL, plus the buyer's details
#[derive(Debug, Deserialize)]
pub struct VnpayConfirmRequest {
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub customer: CustomerInput,
}

/// Buyer's details for a PayPal capture
#[derive(Debug, Default, Deserialize)]
pub struct PaypalCaptureRequest {
    #[serde(default)]
    pub customer: CustomerInput,
}

/// Staff workflow step
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    /// Status the caller believes the invoice is in
    pub expected: InvoiceStatus,
    pub status: InvoiceStatus,
}

/// Cancellation outcome
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub invoice: Invoice,
    /// False when the invoice was already cancelled
    pub stock_restored: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn checkout_error_to_response(err: CheckoutError) -> ApiError {
    let code = err.status_code();
    if code >= 500 {
        error!(error = %err, "Request failed");
    } else {
        debug!(error = %err, "Request rejected");
    }

    let mut response = ErrorResponse::new(err.public_message(), code);
    if err.is_retryable() {
        response = response.with_details("Temporary failure, the request can be retried");
    }
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

fn gateway_unavailable(name: &str) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new(format!("{} payments are not configured", name), 503)),
    )
}

/// Caller address for the bank redirect, as reported by the proxy in front
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(FALLBACK_CLIENT_IP)
        .to_string()
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storefront-checkout",
        "version": env!("CARGO_PKG_VERSION"),
        "payment_channels": state.channels(),
    }))
}

/// Get products list
pub async fn list_products(State(state): State<AppState>) -> impl IntoResponse {
    let products: Vec<_> = state.catalog.active_products().collect();
    Json(serde_json::json!({
        "products": products,
        "count": products.len()
    }))
}

/// Get single product
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .catalog
        .get(&product_id)
        .filter(|p| p.active)
        .ok_or_else(|| checkout_error_to_response(CheckoutError::ProductNotFound { product_id }))?;

    Ok(Json(product.clone()))
}

/// Current cart
pub async fn view_cart(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<(SessionId, Json<CartView>), ApiError> {
    let view = state
        .orchestrator
        .carts()
        .view(session.as_str())
        .await
        .map_err(checkout_error_to_response)?;
    Ok((session, Json(view)))
}

/// Empty the cart
pub async fn clear_cart(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<(SessionId, StatusCode), ApiError> {
    state
        .orchestrator
        .carts()
        .clear(session.as_str())
        .await
        .map_err(checkout_error_to_response)?;
    Ok((session, StatusCode::NO_CONTENT))
}

/// Add a product to the cart
#[instrument(skip(state, session, request), fields(session_id = %session.0, product_id = %request.product_id))]
pub async fn add_item(
    State(state): State<AppState>,
    session: SessionId,
    Json(request): Json<AddItemRequest>,
) -> Result<(SessionId, Json<CartView>), ApiError> {
    let view = state
        .orchestrator
        .carts()
        .add(session.as_str(), &request.product_id, request.quantity)
        .await
        .map_err(checkout_error_to_response)?;
    Ok((session, Json(view)))
}

/// Set a line's quantity
#[instrument(skip(state, session, request), fields(session_id = %session.0))]
pub async fn update_item(
    State(state): State<AppState>,
    session: SessionId,
    Path(product_id): Path<String>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<(SessionId, Json<CartView>), ApiError> {
    let view = state
        .orchestrator
        .carts()
        .update(session.as_str(), &product_id, request.quantity)
        .await
        .map_err(checkout_error_to_response)?;
    Ok((session, Json(view)))
}

/// Drop a line
pub async fn remove_item(
    State(state): State<AppState>,
    session: SessionId,
    Path(product_id): Path<String>,
) -> Result<(SessionId, Json<CartView>), ApiError> {
    let view = state
        .orchestrator
        .carts()
        .remove(session.as_str(), &product_id)
        .await
        .map_err(checkout_error_to_response)?;
    Ok((session, Json(view)))
}

/// Cart totals estimated in another currency; the stored cart is unchanged
pub async fn preview_cart(
    State(state): State<AppState>,
    session: SessionId,
    Query(query): Query<PreviewQuery>,
) -> Result<(SessionId, Json<CartView>), ApiError> {
    let target: Currency = query.currency.parse().map_err(checkout_error_to_response)?;
    let view = state
        .orchestrator
        .carts()
        .preview_in_currency(session.as_str(), target)
        .await
        .map_err(checkout_error_to_response)?;
    Ok((session, Json(view)))
}

/// Create an invoice straight from the cart (cash on delivery, or a bank
/// transfer settled outside the gateways)
#[instrument(skip(state, session, context, request), fields(session_id = %session.0, channel = request.payment_channel.as_str()))]
pub async fn checkout(
    State(state): State<AppState>,
    session: SessionId,
    context: CustomerContext,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, SessionId, Json<Invoice>), ApiError> {
    let customer = request.customer.resolve(&context);
    let mut invoice_request = InvoiceRequest::new(request.payment_channel, customer);
    if let Some(method) = request.payment_method {
        invoice_request.payment_method = method;
    }

    let invoice = state
        .orchestrator
        .create_invoice(session.as_str(), &invoice_request)
        .await
        .map_err(checkout_error_to_response)?;

    info!(
        invoice_id = %invoice.id,
        code = %invoice.invoice_code,
        total = %invoice.total_amount,
        currency = %invoice.currency,
        "Invoice created"
    );
    Ok((StatusCode::CREATED, session, Json(invoice)))
}

/// Signed VNPay redirect for the current cart
#[instrument(skip(state, session, headers), fields(session_id = %session.0))]
pub async fn vnpay_payment_url(
    State(state): State<AppState>,
    session: SessionId,
    headers: HeaderMap,
) -> Result<(SessionId, Json<PaymentRedirect>), ApiError> {
    let gateway = state.vnpay.clone().ok_or_else(|| gateway_unavailable("VNPay"))?;

    let quote = state
        .orchestrator
        .quote(session.as_str())
        .await
        .map_err(checkout_error_to_response)?;
    let reference = state.orchestrator.preview_code();
    let redirect = gateway
        .create_payment_url(&quote, &reference, &client_ip(&headers), Utc::now())
        .map_err(checkout_error_to_response)?;

    Ok((session, Json(redirect)))
}

/// Verify the VNPay return parameters and settle the cart
#[instrument(skip(state, session, context, request), fields(session_id = %session.0))]
pub async fn vnpay_confirm(
    State(state): State<AppState>,
    session: SessionId,
    context: CustomerContext,
    Json(request): Json<VnpayConfirmRequest>,
) -> Result<(SessionId, Json<Invoice>), ApiError> {
    let gateway = state.vnpay.clone().ok_or_else(|| gateway_unavailable("VNPay"))?;

    let callback = gateway.verify_callback(&request.params).map_err(|e| {
        warn!(error = %e, "Rejected VNPay callback");
        checkout_error_to_response(e)
    })?;

    let invoice = state
        .orchestrator
        .settle(session.as_str(), &callback, request.customer.resolve(&context))
        .await
        .map_err(checkout_error_to_response)?;

    info!(invoice_id = %invoice.id, txn_ref = %callback.txn_ref, "VNPay payment settled");
    Ok((session, Json(invoice)))
}

/// Remote PayPal order for the current cart
#[instrument(skip(state, session), fields(session_id = %session.0))]
pub async fn paypal_create_order(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<(SessionId, Json<PaymentRedirect>), ApiError> {
    let gateway = state.paypal.clone().ok_or_else(|| gateway_unavailable("PayPal"))?;

    let quote = state
        .orchestrator
        .quote(session.as_str())
        .await
        .map_err(checkout_error_to_response)?;
    let reference = state.orchestrator.preview_code();
    let redirect = gateway
        .create_order(&quote, &reference)
        .await
        .map_err(checkout_error_to_response)?;

    Ok((session, Json(redirect)))
}

/// Capture an approved PayPal order and settle the cart
#[instrument(skip(state, session, context, request), fields(session_id = %session.0))]
pub async fn paypal_capture_order(
    State(state): State<AppState>,
    session: SessionId,
    Path(order_id): Path<String>,
    context: CustomerContext,
    Json(request): Json<PaypalCaptureRequest>,
) -> Result<(SessionId, Json<Invoice>), ApiError> {
    let gateway = state.paypal.clone().ok_or_else(|| gateway_unavailable("PayPal"))?;

    let confirmer = gateway.capture_confirmer(order_id.as_str());
    let invoice = state
        .orchestrator
        .settle(session.as_str(), &confirmer, request.customer.resolve(&context))
        .await
        .map_err(checkout_error_to_response)?;

    info!(invoice_id = %invoice.id, %order_id, "PayPal payment settled");
    Ok((session, Json(invoice)))
}

/// Invoice lookup
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, ApiError> {
    state
        .orchestrator
        .invoice(invoice_id)
        .await
        .map(Json)
        .map_err(checkout_error_to_response)
}

/// Staff workflow transition
#[instrument(skip(state))]
pub async fn update_invoice_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Invoice>, ApiError> {
    state
        .orchestrator
        .update_status(invoice_id, request.expected, request.status)
        .await
        .map(Json)
        .map_err(checkout_error_to_response)
}

/// Cancel an invoice and put its stock back
#[instrument(skip(state))]
pub async fn cancel_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let transition = state
        .orchestrator
        .cancel_invoice(invoice_id)
        .await
        .map_err(checkout_error_to_response)?;

    let stock_restored = transition.was_applied();
    Ok(Json(CancelResponse {
        invoice: transition.into_invoice(),
        stock_restored,
    }))
}
