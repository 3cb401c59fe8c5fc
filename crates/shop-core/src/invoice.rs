//! # Invoice Types
//!
//! Durable invoice header + immutable line snapshots, and the store that
//! persists them. Totals are fixed at creation; afterwards only payment and
//! workflow status move, and every status change names the status it expects
//! to replace.

use crate::error::{CheckoutError, CheckoutResult};
use crate::product::Currency;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// How the customer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cod,
    BankTransfer,
}

/// Which rail carries the payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentChannel {
    CashOnDelivery,
    Vnpay,
    Paypal,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::CashOnDelivery => "CASH_ON_DELIVERY",
            PaymentChannel::Vnpay => "VNPAY",
            PaymentChannel::Paypal => "PAYPAL",
        }
    }

    /// The payment method this channel belongs to
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentChannel::CashOnDelivery => PaymentMethod::Cod,
            PaymentChannel::Vnpay | PaymentChannel::Paypal => PaymentMethod::BankTransfer,
        }
    }
}

/// Money state of an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// Fulfilment state of an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    New,
    Confirmed,
    Processing,
    Completed,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::New => "NEW",
            InvoiceStatus::Confirmed => "CONFIRMED",
            InvoiceStatus::Processing => "PROCESSING",
            InvoiceStatus::Completed => "COMPLETED",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses from which a cancellation restores stock
    pub const CANCELLABLE: [InvoiceStatus; 3] = [
        InvoiceStatus::New,
        InvoiceStatus::Confirmed,
        InvoiceStatus::Processing,
    ];

    /// Forward workflow step allowed for staff
    pub fn can_advance_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::New, InvoiceStatus::Confirmed)
                | (InvoiceStatus::Confirmed, InvoiceStatus::Processing)
                | (InvoiceStatus::Processing, InvoiceStatus::Completed)
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer details captured on the invoice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
}

impl CustomerInfo {
    /// Required fields present; email shaped like one when given
    pub fn validate(&self) -> CheckoutResult<()> {
        let required = [
            ("name", &self.name),
            ("phone", &self.phone),
            ("address", &self.address),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CheckoutError::Validation(format!(
                    "Customer {} is required",
                    field
                )));
            }
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(CheckoutError::Validation(format!(
                    "Invalid customer email: {}",
                    email
                )));
            }
        }
        Ok(())
    }
}

/// Immutable per-line snapshot taken at sale time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub invoice_id: Uuid,
    pub product_id: String,
    pub location_id: String,
    pub product_name_snapshot: String,
    pub sku_snapshot: String,
    pub quantity: u32,
    pub unit_price_before_tax: Decimal,
    pub tax_rate_percent: Decimal,
    pub tax_amount: Decimal,
    pub line_total_amount: Decimal,
    /// Stock left at the location right after this sale, kept for audit
    pub remaining_quantity_after_sale: u32,
    /// Set once this line's units are back on the shelf after cancellation
    #[serde(default)]
    pub stock_restored: bool,
}

/// Invoice header plus its items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_code: String,
    pub sub_total: Decimal,
    pub tax_total: Decimal,
    pub total_amount: Decimal,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub payment_channel: PaymentChannel,
    pub payment_status: PaymentStatus,
    pub invoice_status: InvoiceStatus,
    /// Provider-side id of the checkout attempt (VNPay txn ref, PayPal order id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    /// Provider transaction / capture id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub customer: CustomerInfo,
    pub items: Vec<InvoiceItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// sum(line totals) == sub_total + tax_total == total_amount, within one minor unit
    pub fn is_balanced(&self) -> bool {
        let tolerance = self.currency.minor_unit();
        let lines: Decimal = self.items.iter().map(|i| i.line_total_amount).sum();
        (lines - self.total_amount).abs() <= tolerance
            && (self.sub_total + self.tax_total - self.total_amount).abs() <= tolerance
    }
}

/// Proof of payment handed back by a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_reference: String,
    pub completed_at: DateTime<Utc>,
    /// Payer email reported by the provider, used when the invoice has none
    pub payer_email: Option<String>,
}

/// Result of a status change request
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Status moved; carries the updated invoice
    Applied(Invoice),
    /// Invoice was already in the target status; nothing changed
    Unchanged(Invoice),
}

impl Transition {
    pub fn invoice(&self) -> &Invoice {
        match self {
            Transition::Applied(invoice) | Transition::Unchanged(invoice) => invoice,
        }
    }

    pub fn into_invoice(self) -> Invoice {
        match self {
            Transition::Applied(invoice) | Transition::Unchanged(invoice) => invoice,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Human-readable invoice codes: `INV-YYYYMMDD-XXXXXXXX`
#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceCodeGenerator;

impl InvoiceCodeGenerator {
    pub fn generate(&self, at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
        format!("INV-{}-{}", at.format("%Y%m%d"), suffix)
    }
}

/// Invoice persistence seam.
///
/// `insert` enforces uniqueness of `invoice_code` and `gateway_reference`.
/// Status mutations compare against the current status under the store's
/// own lock so concurrent writers cannot lose updates.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert(&self, invoice: Invoice) -> CheckoutResult<()>;

    async fn get(&self, id: Uuid) -> CheckoutResult<Option<Invoice>>;

    async fn find_by_gateway_reference(&self, reference: &str) -> CheckoutResult<Option<Invoice>>;

    /// PENDING -> PAID. Re-recording the same reference is a no-op.
    async fn record_payment(&self, id: Uuid, record: PaymentRecord) -> CheckoutResult<Invoice>;

    /// PENDING -> FAILED
    async fn mark_payment_failed(&self, id: Uuid) -> CheckoutResult<Invoice>;

    /// Move to `to` only if the current status is one of `expected`,
    /// otherwise `InvalidTransition`
    async fn transition(
        &self,
        id: Uuid,
        expected: &[InvoiceStatus],
        to: InvoiceStatus,
    ) -> CheckoutResult<Transition>;

    /// Set the `stock_restored` flag of item `line`. Returns false when the
    /// flag already had that value.
    async fn mark_line_restored(&self, id: Uuid, line: usize, restored: bool) -> CheckoutResult<bool>;

    /// Unpaid bank-transfer invoices still NEW and created before `cutoff`
    async fn list_abandoned(&self, cutoff: DateTime<Utc>) -> CheckoutResult<Vec<Invoice>>;
}

#[derive(Debug, Default)]
struct InvoiceTables {
    invoices: HashMap<Uuid, Invoice>,
    by_code: HashMap<String, Uuid>,
    by_gateway_reference: HashMap<String, Uuid>,
}

impl InvoiceTables {
    fn row_mut(&mut self, id: Uuid) -> CheckoutResult<&mut Invoice> {
        self.invoices
            .get_mut(&id)
            .ok_or_else(|| CheckoutError::InvoiceNotFound {
                invoice_id: id.to_string(),
            })
    }
}

/// In-process invoice store
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    tables: RwLock<InvoiceTables>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored invoices
    pub async fn len(&self) -> usize {
        self.tables.read().await.invoices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn insert(&self, invoice: Invoice) -> CheckoutResult<()> {
        let mut tables = self.tables.write().await;

        if tables.invoices.contains_key(&invoice.id) {
            return Err(CheckoutError::InternalInconsistency(format!(
                "Invoice id {} reused",
                invoice.id
            )));
        }
        if tables.by_code.contains_key(&invoice.invoice_code) {
            return Err(CheckoutError::DuplicateInvoiceCode {
                code: invoice.invoice_code,
            });
        }
        if let Some(reference) = &invoice.gateway_reference {
            if tables.by_gateway_reference.contains_key(reference) {
                return Err(CheckoutError::DuplicateGatewayReference {
                    reference: reference.clone(),
                });
            }
            tables
                .by_gateway_reference
                .insert(reference.clone(), invoice.id);
        }

        tables.by_code.insert(invoice.invoice_code.clone(), invoice.id);
        debug!(invoice_id = %invoice.id, code = %invoice.invoice_code, "Invoice stored");
        tables.invoices.insert(invoice.id, invoice);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CheckoutResult<Option<Invoice>> {
        Ok(self.tables.read().await.invoices.get(&id).cloned())
    }

    async fn find_by_gateway_reference(&self, reference: &str) -> CheckoutResult<Option<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_gateway_reference
            .get(reference)
            .and_then(|id| tables.invoices.get(id))
            .cloned())
    }

    async fn record_payment(&self, id: Uuid, record: PaymentRecord) -> CheckoutResult<Invoice> {
        let mut tables = self.tables.write().await;
        let invoice = tables.row_mut(id)?;

        match invoice.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Paid
                if invoice.payment_reference.as_deref() == Some(record.payment_reference.as_str()) =>
            {
                return Ok(invoice.clone());
            }
            other => {
                return Err(CheckoutError::InvalidTransition {
                    invoice_id: id.to_string(),
                    from: format!("{:?}", other).to_uppercase(),
                    to: "PAID".to_string(),
                });
            }
        }

        invoice.payment_status = PaymentStatus::Paid;
        invoice.payment_reference = Some(record.payment_reference);
        invoice.payment_completed_at = Some(record.completed_at);
        if invoice.customer.email.is_none() {
            invoice.customer.email = record.payer_email;
        }
        invoice.updated_at = Utc::now();

        info!(invoice_id = %id, code = %invoice.invoice_code, "Invoice marked paid");
        Ok(invoice.clone())
    }

    async fn mark_payment_failed(&self, id: Uuid) -> CheckoutResult<Invoice> {
        let mut tables = self.tables.write().await;
        let invoice = tables.row_mut(id)?;

        match invoice.payment_status {
            PaymentStatus::Pending => {
                invoice.payment_status = PaymentStatus::Failed;
                invoice.updated_at = Utc::now();
                Ok(invoice.clone())
            }
            PaymentStatus::Failed => Ok(invoice.clone()),
            PaymentStatus::Paid => Err(CheckoutError::InvalidTransition {
                invoice_id: id.to_string(),
                from: "PAID".to_string(),
                to: "FAILED".to_string(),
            }),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[InvoiceStatus],
        to: InvoiceStatus,
    ) -> CheckoutResult<Transition> {
        let mut tables = self.tables.write().await;
        let invoice = tables.row_mut(id)?;

        if !expected.contains(&invoice.invoice_status) {
            return Err(CheckoutError::InvalidTransition {
                invoice_id: id.to_string(),
                from: invoice.invoice_status.to_string(),
                to: to.to_string(),
            });
        }

        let from = invoice.invoice_status;
        invoice.invoice_status = to;
        invoice.updated_at = Utc::now();
        info!(invoice_id = %id, %from, %to, "Invoice status changed");
        Ok(Transition::Applied(invoice.clone()))
    }

    async fn mark_line_restored(&self, id: Uuid, line: usize, restored: bool) -> CheckoutResult<bool> {
        let mut tables = self.tables.write().await;
        let invoice = tables.row_mut(id)?;
        let item = invoice.items.get_mut(line).ok_or_else(|| {
            CheckoutError::InternalInconsistency(format!("Invoice {} has no line {}", id, line))
        })?;

        if item.stock_restored == restored {
            return Ok(false);
        }
        item.stock_restored = restored;
        invoice.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_abandoned(&self, cutoff: DateTime<Utc>) -> CheckoutResult<Vec<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .invoices
            .values()
            .filter(|i| {
                i.payment_method == PaymentMethod::BankTransfer
                    && i.payment_status == PaymentStatus::Pending
                    && i.invoice_status == InvoiceStatus::New
                    && i.created_at < cutoff
            })
            .cloned()
            .collect())
    }
}
