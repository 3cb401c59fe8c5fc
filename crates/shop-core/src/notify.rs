//! # Invoice Notifier
//!
//! Fire-and-forget hook called after an invoice is created or paid.
//! Delivery failures are logged and never fail the checkout.

use crate::error::CheckoutResult;
use crate::invoice::Invoice;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Receives invoices once they exist
#[async_trait]
pub trait InvoiceNotifier: Send + Sync {
    async fn invoice_created(&self, invoice: &Invoice) -> CheckoutResult<()>;
}

/// Writes a log line per invoice
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl InvoiceNotifier for LoggingNotifier {
    async fn invoice_created(&self, invoice: &Invoice) -> CheckoutResult<()> {
        info!(
            invoice_id = %invoice.id,
            code = %invoice.invoice_code,
            email = invoice.customer.email.as_deref().unwrap_or("-"),
            "Invoice confirmation queued"
        );
        Ok(())
    }
}

/// Hand the invoice to `notifier` on a background task
pub fn dispatch(notifier: Arc<dyn InvoiceNotifier>, invoice: Invoice) {
    tokio::spawn(async move {
        if let Err(e) = notifier.invoice_created(&invoice).await {
            warn!(invoice_id = %invoice.id, error = %e, "Invoice notification failed");
        }
    });
}
