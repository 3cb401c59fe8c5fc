//! # PayPal Orders
//!
//! Orders v2 create-then-capture flow.
//!
//! ```text
//! NO_ORDER ─► REMOTE_ORDER_CREATED ─► (buyer approves on PayPal)
//!          ─► CAPTURE_REQUESTED ─► CAPTURED | CAPTURE_FAILED
//! ```
//!
//! Creating an order writes nothing locally. Stock and invoice are touched
//! only after `capture` reports COMPLETED.

use crate::config::PaypalConfig;
use crate::token::TokenCache;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shop_core::{
    CartView, CheckoutError, CheckoutResult, ConfirmationFlow, PaymentChannel, PaymentConfirmer,
    PaymentRecord, PaymentRedirect,
};
use tracing::{error, info, instrument, warn};

const PROVIDER: &str = "paypal";
const COMPLETED: &str = "COMPLETED";

/// PayPal wallet gateway
pub struct PaypalGateway {
    config: PaypalConfig,
    client: Client,
    tokens: TokenCache,
}

impl PaypalGateway {
    /// Create a gateway with its own HTTP client
    pub fn new(config: PaypalConfig) -> CheckoutResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            tokens: TokenCache::new(client.clone(), config.clone()),
            config,
            client,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Self::new(PaypalConfig::from_env()?)
    }

    pub fn config(&self) -> &PaypalConfig {
        &self.config
    }

    /// Send with the cached token; on 401 refresh once and resend
    async fn send_authorized<F>(&self, build: F) -> CheckoutResult<Response>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.bearer().await?;
        let response = build(&token).send().await.map_err(network_error)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("PayPal rejected access token, refreshing");
        self.tokens.invalidate().await;
        let token = self.tokens.bearer().await?;
        build(&token).send().await.map_err(network_error)
    }

    /// Create a remote order for the quoted cart.
    ///
    /// `reference_id` is our preview invoice code, carried as the purchase
    /// unit's external reference.
    #[instrument(skip(self, quote), fields(total = %quote.total))]
    pub async fn create_order(
        &self,
        quote: &CartView,
        reference_id: &str,
    ) -> CheckoutResult<PaymentRedirect> {
        let currency = quote.require_currency()?;
        if currency != self.config.currency {
            return Err(CheckoutError::UnsupportedCurrency {
                currency: currency.to_string(),
                expected: self.config.currency.to_string(),
            });
        }
        if quote.total <= Decimal::ZERO {
            return Err(CheckoutError::Validation(
                "Payment amount must be positive".to_string(),
            ));
        }

        let body = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnitRequest {
                reference_id,
                description: format!("Order {}", reference_id),
                amount: Money {
                    currency_code: currency.as_str().to_string(),
                    value: format!("{:.2}", currency.round(quote.total)),
                },
            }],
            application_context: ApplicationContext {
                return_url: &self.config.return_url,
                cancel_url: &self.config.cancel_url,
                user_action: "PAY_NOW",
                shipping_preference: "NO_SHIPPING",
            },
        };

        let url = self.config.endpoint("/v2/checkout/orders");
        let response = self
            .send_authorized(|token| {
                self.client
                    .post(&url)
                    .bearer_auth(token)
                    .header("PayPal-Request-Id", format!("create-{}", reference_id))
                    .json(&body)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let order: OrderResponse = parse(response).await?;
        let approve = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .ok_or_else(|| CheckoutError::upstream(PROVIDER, "Order response has no approve link"))?;

        info!(order_id = %order.id, status = %order.status, reference_id, "Created PayPal order");
        Ok(PaymentRedirect {
            channel: PaymentChannel::Paypal,
            gateway_reference: order.id.clone(),
            redirect_url: approve.href.clone(),
            amount: quote.total,
            currency,
            expires_at: None,
        })
    }

    /// Capture an approved order
    #[instrument(skip(self))]
    pub async fn capture_order(&self, order_id: &str) -> CheckoutResult<CapturedPayment> {
        let url = self
            .config
            .endpoint(&format!("/v2/checkout/orders/{}/capture", order_id));
        let response = self
            .send_authorized(|token| {
                self.client
                    .post(&url)
                    .bearer_auth(token)
                    .header("PayPal-Request-Id", format!("capture-{}", order_id))
                    .header("Content-Type", "application/json")
                    .body("{}")
            })
            .await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST
        ) {
            let reason = match response.json::<ApiErrorResponse>().await {
                Ok(body) => body.summary(),
                Err(_) => format!("HTTP {}", status),
            };
            warn!(order_id, %reason, "PayPal capture refused");
            return Err(CheckoutError::PaymentNotCompleted { reason });
        }
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let captured: CaptureResponse = parse(response).await?;
        if captured.status != COMPLETED {
            return Err(CheckoutError::PaymentNotCompleted {
                reason: format!("PayPal order status {}", captured.status),
            });
        }

        let capture = captured
            .purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .next()
            .ok_or_else(|| CheckoutError::upstream(PROVIDER, "Completed order has no capture"))?;
        if capture.status != COMPLETED {
            return Err(CheckoutError::PaymentNotCompleted {
                reason: format!("PayPal capture status {}", capture.status),
            });
        }

        let amount = capture
            .amount
            .as_ref()
            .ok_or_else(|| CheckoutError::upstream(PROVIDER, "Completed capture has no amount"))?;

        info!(order_id, capture_id = %capture.id, value = %amount.value, "Captured PayPal order");
        Ok(CapturedPayment {
            order_id: captured.id.clone(),
            capture_id: capture.id.clone(),
            amount: amount.value.clone(),
            currency_code: amount.currency_code.clone(),
            payer_email: captured.payer.and_then(|p| p.email_address),
        })
    }

    /// Confirmer that captures `order_id` when the orchestrator asks
    pub fn capture_confirmer(&self, order_id: impl Into<String>) -> PaypalCapture<'_> {
        PaypalCapture {
            gateway: self,
            order_id: order_id.into(),
        }
    }
}

impl std::fmt::Debug for PaypalGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaypalGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Result of a completed capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayment {
    pub order_id: String,
    pub capture_id: String,
    pub amount: String,
    pub currency_code: String,
    pub payer_email: Option<String>,
}

/// `PaymentConfirmer` for a PayPal order awaiting capture
pub struct PaypalCapture<'a> {
    gateway: &'a PaypalGateway,
    order_id: String,
}

#[async_trait]
impl PaymentConfirmer for PaypalCapture<'_> {
    fn flow(&self) -> ConfirmationFlow {
        ConfirmationFlow::CaptureThenConfirm
    }

    fn channel(&self) -> PaymentChannel {
        PaymentChannel::Paypal
    }

    fn gateway_reference(&self) -> &str {
        &self.order_id
    }

    async fn confirm(&self, quote: &CartView) -> CheckoutResult<PaymentRecord> {
        let currency = quote.require_currency()?;
        if currency != self.gateway.config.currency {
            return Err(CheckoutError::UnsupportedCurrency {
                currency: currency.to_string(),
                expected: self.gateway.config.currency.to_string(),
            });
        }

        let captured = self.gateway.capture_order(&self.order_id).await?;
        let expected = format!("{:.2}", currency.round(quote.total));
        if captured.currency_code != currency.as_str() || captured.amount != expected {
            warn!(
                order_id = %self.order_id,
                paid = %captured.amount,
                paid_currency = %captured.currency_code,
                %expected,
                "PayPal captured amount differs from cart total"
            );
            return Err(CheckoutError::PaymentNotCompleted {
                reason: format!(
                    "Captured {} {} but cart total is {} {}",
                    captured.amount, captured.currency_code, expected, currency
                ),
            });
        }

        Ok(PaymentRecord {
            payment_reference: captured.capture_id,
            completed_at: Utc::now(),
            payer_email: captured.payer_email,
        })
    }
}

fn network_error(e: reqwest::Error) -> CheckoutError {
    error!(error = %e, "PayPal request failed");
    CheckoutError::upstream(PROVIDER, e.to_string())
}

async fn parse<T: DeserializeOwned>(response: Response) -> CheckoutResult<T> {
    let body = response.text().await.map_err(network_error)?;
    serde_json::from_str(&body).map_err(|e| {
        error!(error = %e, "Unexpected PayPal response shape");
        CheckoutError::upstream(PROVIDER, format!("Malformed response: {}", e))
    })
}

async fn api_error(status: StatusCode, response: Response) -> CheckoutError {
    let body = response.text().await.unwrap_or_default();
    error!(%status, %body, "PayPal API error");
    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.summary())
        .unwrap_or_else(|_| format!("HTTP {}", status));
    CheckoutError::upstream(PROVIDER, message)
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnitRequest<'a>>,
    application_context: ApplicationContext<'a>,
}

#[derive(Debug, Serialize)]
struct PurchaseUnitRequest<'a> {
    reference_id: &'a str,
    description: String,
    amount: Money,
}

#[derive(Debug, Serialize, Deserialize)]
struct Money {
    currency_code: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ApplicationContext<'a> {
    return_url: &'a str,
    cancel_url: &'a str,
    user_action: &'static str,
    shipping_preference: &'static str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
    #[serde(default)]
    payer: Option<Payer>,
    #[serde(default)]
    purchase_units: Vec<CapturedUnit>,
}

#[derive(Debug, Deserialize)]
struct Payer {
    #[serde(default)]
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapturedUnit {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    issue: String,
}

impl ApiErrorResponse {
    fn summary(&self) -> String {
        match self.details.first() {
            Some(detail) => format!("{}: {}", self.name, detail.issue),
            None => match &self.message {
                Some(message) => format!("{}: {}", self.name, message),
                None => self.name.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use shop_core::{Cart, Currency, Price, Product};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": token,
                "token_type": "Bearer",
                "expires_in": 32400
            })))
            .mount(server)
            .await;
    }

    fn gateway(server: &MockServer) -> PaypalGateway {
        let config = PaypalConfig::new(
            "client",
            "secret",
            "https://shop.example/paypal/return",
            "https://shop.example/paypal/cancel",
        )
        .with_api_base(server.uri());
        PaypalGateway::new(config).unwrap()
    }

    fn usd_quote() -> CartView {
        let product = Product::new("mug", "MUG-1", "Mug", Price::new(dec!(10.00), Currency::USD), dec!(10));
        let mut cart = Cart::new();
        cart.put(&product, 2).unwrap();
        cart.view()
    }

    fn captured_body(order_id: &str, status: &str) -> serde_json::Value {
        json!({
            "id": order_id,
            "status": status,
            "payer": { "email_address": "buyer@example.com", "payer_id": "QYR5Z8XDVJNXQ" },
            "purchase_units": [{
                "reference_id": "INV-20260115-0A1B2C3D",
                "payments": {
                    "captures": [{
                        "id": "3C679366HH908993F",
                        "status": status,
                        "amount": { "currency_code": "USD", "value": "22.00" }
                    }]
                }
            }]
        })
    }

    #[tokio::test]
    async fn test_create_order() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(header("authorization", "Bearer A21AA-token"))
            .and(body_partial_json(json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": "INV-20260115-0A1B2C3D",
                    "amount": { "currency_code": "USD", "value": "22.00" }
                }]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "5O190127TN364715T",
                "status": "CREATED",
                "links": [
                    { "href": "https://api-m.sandbox.paypal.com/v2/checkout/orders/5O190127TN364715T", "rel": "self", "method": "GET" },
                    { "href": "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "approve", "method": "GET" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let redirect = gateway(&server)
            .create_order(&usd_quote(), "INV-20260115-0A1B2C3D")
            .await
            .unwrap();

        assert_eq!(redirect.gateway_reference, "5O190127TN364715T");
        assert!(redirect.redirect_url.contains("checkoutnow"));
        assert_eq!(redirect.amount, dec!(22.00));
    }

    #[tokio::test]
    async fn test_create_order_rejects_other_currency() {
        let server = MockServer::start().await;
        let product = Product::new("k", "K", "Kettle", Price::new(dec!(250000), Currency::VND), dec!(0));
        let mut cart = Cart::new();
        cart.put(&product, 1).unwrap();

        let err = gateway(&server).create_order(&cart.view(), "INV-1").await.unwrap_err();
        assert!(matches!(err, CheckoutError::UnsupportedCurrency { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_rejects_zero_total() {
        let server = MockServer::start().await;
        let product = Product::new("free", "F", "Free", Price::new(dec!(0), Currency::USD), dec!(0));
        let mut cart = Cart::new();
        cart.put(&product, 1).unwrap();

        let err = gateway(&server).create_order(&cart.view(), "INV-1").await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AA-stale", "expires_in": 32400
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AA-fresh", "expires_in": 32400
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-1/capture"))
            .and(header("authorization", "Bearer A21AA-stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-1/capture"))
            .and(header("authorization", "Bearer A21AA-fresh"))
            .respond_with(ResponseTemplate::new(201).set_body_json(captured_body("ORDER-1", "COMPLETED")))
            .expect(1)
            .mount(&server)
            .await;

        let captured = gateway(&server).capture_order("ORDER-1").await.unwrap();
        assert_eq!(captured.capture_id, "3C679366HH908993F");
        assert_eq!(captured.amount, "22.00");
        assert_eq!(captured.currency_code, "USD");
        assert_eq!(captured.payer_email.as_deref(), Some("buyer@example.com"));
    }

    #[tokio::test]
    async fn test_capture_not_completed() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-2/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(captured_body("ORDER-2", "PENDING")))
            .mount(&server)
            .await;

        let err = gateway(&server).capture_order("ORDER-2").await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentNotCompleted { .. }));
    }

    #[tokio::test]
    async fn test_capture_unapproved_order() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-3/capture"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "name": "UNPROCESSABLE_ENTITY",
                "details": [{ "issue": "ORDER_NOT_APPROVED", "description": "Payer has not yet approved the Order for payment." }],
                "debug_id": "f2a3c4d5e6"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).capture_order("ORDER-3").await.unwrap_err();
        match err {
            CheckoutError::PaymentNotCompleted { reason } => assert!(reason.contains("ORDER_NOT_APPROVED")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-4/capture"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = gateway(&server).capture_order("ORDER-4").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_fields_are_upstream_failures() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-5/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "status": "COMPLETED" })))
            .mount(&server)
            .await;

        let err = gateway(&server).capture_order("ORDER-5").await.unwrap_err();
        assert!(matches!(err, CheckoutError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_capture_without_amount_is_upstream_failure() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        let mut body = captured_body("ORDER-7", "COMPLETED");
        body["purchase_units"][0]["payments"]["captures"][0]
            .as_object_mut()
            .unwrap()
            .remove("amount");
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-7/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(body))
            .mount(&server)
            .await;

        let err = gateway(&server).capture_order("ORDER-7").await.unwrap_err();
        assert!(matches!(err, CheckoutError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_confirmer_maps_capture_to_record() {
        let server = MockServer::start().await;
        mount_token(&server, "A21AA-token").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-6/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(captured_body("ORDER-6", "COMPLETED")))
            .mount(&server)
            .await;

        let g = gateway(&server);
        let confirmer = g.capture_confirmer("ORDER-6");
        assert_eq!(confirmer.gateway_reference(), "ORDER-6");

        let record = confirmer.confirm(&usd_quote()).await.unwrap();
        assert_eq!(record.payment_reference, "3C679366HH908993F");
        assert_eq!(record.payer_email.as_deref(), Some("buyer@example.com"));
    }
}
