//! # Invoice Webhook
//!
//! Forwards every new invoice as JSON to an external URL (order
//! confirmation mailer, ERP import, ...). Delivery runs on a background
//! task, so a slow or failing receiver never holds up checkout.

use async_trait::async_trait;
use reqwest::Client;
use shop_core::{CheckoutError, CheckoutResult, Invoice, InvoiceNotifier};
use std::time::Duration;
use tracing::{error, info};

const PROVIDER: &str = "invoice-webhook";

/// POSTs the invoice JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl InvoiceNotifier for WebhookNotifier {
    async fn invoice_created(&self, invoice: &Invoice) -> CheckoutResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(invoice)
            .send()
            .await
            .map_err(|e| {
                error!(invoice_id = %invoice.id, error = %e, "Invoice webhook unreachable");
                CheckoutError::upstream(PROVIDER, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(invoice_id = %invoice.id, %status, body = %body, "Invoice webhook rejected");
            return Err(CheckoutError::upstream(
                PROVIDER,
                format!("Receiver answered HTTP {}", status),
            ));
        }

        info!(invoice_id = %invoice.id, code = %invoice.invoice_code, "Invoice webhook delivered");
        Ok(())
    }
}
