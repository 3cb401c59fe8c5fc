//! # Settlement Orchestrator
//!
//! Sequences cart -> invoice -> payment confirmation -> payment status, and
//! owns the compensating stock restoration for cancelled invoices.
//!
//! ## Flows
//!
//! ```text
//! COD / unpaid bank transfer:   cart ─► factory ─► clear cart ─► notify
//!
//! gateway (any confirmer):      existing invoice for reference? ─► return it
//!                               cart ─► quote ─► confirm ─► factory ─► PAID
//!                                    ─► clear cart ─► notify
//!
//! cancel:                       status CAS ─► (winner only) restore stock
//! ```

use crate::cart::{CartService, CartView};
use crate::confirmer::PaymentConfirmer;
use crate::error::{CheckoutError, CheckoutResult};
use crate::factory::{InvoiceFactory, InvoiceRequest};
use crate::inventory::InventoryLedger;
use crate::invoice::{CustomerInfo, Invoice, InvoiceStatus, InvoiceStore, Transition};
use crate::notify::{dispatch, InvoiceNotifier};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Undoes the stock decrement of a cancelled invoice
pub struct StockCompensator {
    ledger: Arc<dyn InventoryLedger>,
    invoices: Arc<dyn InvoiceStore>,
}

impl StockCompensator {
    pub fn new(ledger: Arc<dyn InventoryLedger>, invoices: Arc<dyn InvoiceStore>) -> Self {
        Self { ledger, invoices }
    }

    /// Put `quantity` units of a cancelled line back on the shelf
    pub async fn restore_stock_for_cancelled_invoice(
        &self,
        location_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> CheckoutResult<u32> {
        self.ledger.restore(location_id, product_id, quantity).await
    }

    /// Cancel an invoice from any cancellable status
    pub async fn cancel(&self, invoice_id: Uuid) -> CheckoutResult<Transition> {
        self.cancel_from(invoice_id, &InvoiceStatus::CANCELLABLE).await
    }

    /// Cancel an invoice currently in one of `expected` and restore its stock
    /// exactly once.
    ///
    /// Each line is claimed through its `stock_restored` flag before the
    /// ledger is touched, so concurrent cancels never restore a line twice.
    /// Cancelling an already cancelled invoice yields `Transition::Unchanged`
    /// and finishes any line whose restoration failed earlier.
    #[instrument(skip(self))]
    pub async fn cancel_from(
        &self,
        invoice_id: Uuid,
        expected: &[InvoiceStatus],
    ) -> CheckoutResult<Transition> {
        let transition = match self
            .invoices
            .transition(invoice_id, expected, InvoiceStatus::Cancelled)
            .await
        {
            Ok(transition) => transition,
            Err(e @ CheckoutError::InvalidTransition { .. }) => match self.invoices.get(invoice_id).await? {
                Some(invoice) if invoice.invoice_status == InvoiceStatus::Cancelled => {
                    info!(%invoice_id, "Invoice already cancelled");
                    Transition::Unchanged(invoice)
                }
                _ => return Err(e),
            },
            Err(e) => return Err(e),
        };

        let mut first_failure = None;
        for (line, item) in transition.invoice().items.iter().enumerate() {
            if item.stock_restored || !self.invoices.mark_line_restored(invoice_id, line, true).await? {
                continue;
            }
            match self
                .restore_stock_for_cancelled_invoice(&item.location_id, &item.product_id, item.quantity)
                .await
            {
                Ok(restored) => info!(
                    %invoice_id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    restored,
                    "Stock restored"
                ),
                Err(e) => {
                    error!(%invoice_id, product_id = %item.product_id, error = %e, "Stock restoration failed");
                    // release the claim so a later cancel retries this line
                    if let Err(release) = self.invoices.mark_line_restored(invoice_id, line, false).await {
                        error!(%invoice_id, line, error = %release, "Could not release restore claim");
                    }
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(transition),
        }
    }
}

impl std::fmt::Debug for StockCompensator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockCompensator").finish_non_exhaustive()
    }
}

/// Outcome of one abandoned-invoice sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cancelled: usize,
    pub skipped: usize,
}

/// Checkout and settlement entry point shared by every HTTP surface
pub struct SettlementOrchestrator {
    carts: Arc<CartService>,
    factory: Arc<InvoiceFactory>,
    invoices: Arc<dyn InvoiceStore>,
    compensator: StockCompensator,
    notifier: Arc<dyn InvoiceNotifier>,
}

impl SettlementOrchestrator {
    pub fn new(
        carts: Arc<CartService>,
        factory: Arc<InvoiceFactory>,
        invoices: Arc<dyn InvoiceStore>,
        ledger: Arc<dyn InventoryLedger>,
        notifier: Arc<dyn InvoiceNotifier>,
    ) -> Self {
        Self {
            carts,
            factory,
            compensator: StockCompensator::new(ledger, invoices.clone()),
            invoices,
            notifier,
        }
    }

    pub fn carts(&self) -> &CartService {
        &self.carts
    }

    /// Fresh reference for a gateway checkout
    pub fn preview_code(&self) -> String {
        self.factory.preview_code()
    }

    /// Session cart re-priced from the catalog
    pub async fn quote(&self, session_id: &str) -> CheckoutResult<CartView> {
        let cart = self.carts.snapshot(session_id).await?;
        self.factory.quote(&cart).await
    }

    /// Checkout without a gateway (COD, or a bank transfer paid later)
    #[instrument(skip(self, request))]
    pub async fn create_invoice(
        &self,
        session_id: &str,
        request: &InvoiceRequest,
    ) -> CheckoutResult<Invoice> {
        let cart = self.carts.snapshot(session_id).await?;
        let invoice = self.factory.create(&cart, request, None).await?;
        self.finish(session_id, &invoice).await;
        Ok(invoice)
    }

    /// Confirm a gateway payment and create the paid invoice.
    ///
    /// Repeat deliveries for a reference that already has an invoice return
    /// that invoice without touching the provider, the cart or the ledger.
    #[instrument(skip(self, confirmer, customer), fields(reference = confirmer.gateway_reference()))]
    pub async fn settle(
        &self,
        session_id: &str,
        confirmer: &dyn PaymentConfirmer,
        customer: CustomerInfo,
    ) -> CheckoutResult<Invoice> {
        let reference = confirmer.gateway_reference();
        if let Some(existing) = self.invoices.find_by_gateway_reference(reference).await? {
            info!(invoice_id = %existing.id, "Payment already settled");
            return Ok(existing);
        }

        let request = InvoiceRequest::new(confirmer.channel(), customer);
        request.validate()?;

        let cart = self.carts.snapshot(session_id).await?;
        let quote = self.factory.quote(&cart).await?;

        let record = match confirmer.confirm(&quote).await {
            Ok(record) => record,
            Err(e) => {
                // a concurrent delivery may have won the race
                if let Some(existing) = self.invoices.find_by_gateway_reference(reference).await? {
                    return Ok(existing);
                }
                warn!(flow = ?confirmer.flow(), error = %e, "Payment not confirmed");
                return Err(e);
            }
        };

        let invoice = match self.factory.create(&cart, &request, Some(reference)).await {
            Ok(invoice) => invoice,
            Err(CheckoutError::DuplicateGatewayReference { .. }) => {
                return self
                    .invoices
                    .find_by_gateway_reference(reference)
                    .await?
                    .ok_or_else(|| {
                        CheckoutError::InternalInconsistency(format!(
                            "Gateway reference {} reported taken but not found",
                            reference
                        ))
                    });
            }
            Err(e) => {
                error!(error = %e, "Payment confirmed but invoice creation failed");
                return Err(e);
            }
        };

        let paid = self
            .invoices
            .record_payment(invoice.id, record)
            .await
            .map_err(|e| {
                error!(invoice_id = %invoice.id, error = %e, "Could not record confirmed payment");
                CheckoutError::InternalInconsistency(format!(
                    "Invoice {} created but payment not recorded",
                    invoice.id
                ))
            })?;

        self.finish(session_id, &paid).await;
        Ok(paid)
    }

    async fn finish(&self, session_id: &str, invoice: &Invoice) {
        if let Err(e) = self.carts.clear(session_id).await {
            warn!(session_id, error = %e, "Failed to clear cart after checkout");
        }
        dispatch(self.notifier.clone(), invoice.clone());
    }

    pub async fn invoice(&self, invoice_id: Uuid) -> CheckoutResult<Invoice> {
        self.invoices
            .get(invoice_id)
            .await?
            .ok_or_else(|| CheckoutError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            })
    }

    /// Staff workflow step. `expected` must match the stored status.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        invoice_id: Uuid,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> CheckoutResult<Invoice> {
        if to == InvoiceStatus::Cancelled {
            if !InvoiceStatus::CANCELLABLE.contains(&expected) {
                return Err(CheckoutError::InvalidTransition {
                    invoice_id: invoice_id.to_string(),
                    from: expected.to_string(),
                    to: to.to_string(),
                });
            }
            let transition = self.compensator.cancel_from(invoice_id, &[expected]).await?;
            if !transition.was_applied() {
                return Err(CheckoutError::InvalidTransition {
                    invoice_id: invoice_id.to_string(),
                    from: InvoiceStatus::Cancelled.to_string(),
                    to: to.to_string(),
                });
            }
            return Ok(transition.into_invoice());
        }

        if !expected.can_advance_to(to) {
            return Err(CheckoutError::InvalidTransition {
                invoice_id: invoice_id.to_string(),
                from: expected.to_string(),
                to: to.to_string(),
            });
        }
        self.invoices
            .transition(invoice_id, &[expected], to)
            .await
            .map(Transition::into_invoice)
    }

    pub async fn cancel_invoice(&self, invoice_id: Uuid) -> CheckoutResult<Transition> {
        self.compensator.cancel(invoice_id).await
    }

    /// Fail and cancel unpaid bank-transfer invoices older than `abandoned_after`
    #[instrument(skip(self))]
    pub async fn sweep_abandoned(&self, abandoned_after: Duration) -> CheckoutResult<SweepReport> {
        let cutoff = Utc::now() - abandoned_after;
        let mut report = SweepReport::default();

        for invoice in self.invoices.list_abandoned(cutoff).await? {
            if let Err(e) = self.invoices.mark_payment_failed(invoice.id).await {
                warn!(invoice_id = %invoice.id, error = %e, "Skipping invoice paid during sweep");
                report.skipped += 1;
                continue;
            }
            match self.compensator.cancel(invoice.id).await {
                Ok(t) if t.was_applied() => report.cancelled += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    warn!(invoice_id = %invoice.id, error = %e, "Abandoned invoice not cancelled");
                    report.skipped += 1;
                }
            }
        }

        if report.cancelled > 0 {
            info!(cancelled = report.cancelled, skipped = report.skipped, "Abandoned invoices swept");
        }
        Ok(report)
    }
}

impl std::fmt::Debug for SettlementOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementOrchestrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::InMemoryCartStore;
    use crate::confirmer::ConfirmationFlow;
    use crate::currency::{CurrencyConverter, StaticRateSource};
    use crate::inventory::InMemoryInventoryLedger;
    use crate::invoice::{InMemoryInvoiceStore, PaymentChannel, PaymentRecord, PaymentStatus};
    use crate::notify::LoggingNotifier;
    use crate::product::{Currency, Price, Product, ProductCatalog};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        orchestrator: SettlementOrchestrator,
        ledger: Arc<InMemoryInventoryLedger>,
        invoices: Arc<InMemoryInvoiceStore>,
    }

    fn fixture() -> Fixture {
        let catalog: Arc<ProductCatalog> = Arc::new(ProductCatalog::new().with_product(
            Product::new(
                "mug",
                "MUG-1",
                "Mug",
                Price::new(dec!(10.00), Currency::USD),
                dec!(10),
            ),
        ));
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        ledger.set_quantity("main", "mug", 5);
        let invoices = Arc::new(InMemoryInvoiceStore::new());
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(StaticRateSource::default()),
            std::time::Duration::from_secs(60),
        ));
        let carts = Arc::new(CartService::new(
            catalog.clone(),
            ledger.clone(),
            Arc::new(InMemoryCartStore::default()),
            converter,
        ));
        let factory = Arc::new(InvoiceFactory::new(catalog, ledger.clone(), invoices.clone()));
        let orchestrator = SettlementOrchestrator::new(
            carts,
            factory,
            invoices.clone(),
            ledger.clone(),
            Arc::new(LoggingNotifier),
        );
        Fixture {
            orchestrator,
            ledger,
            invoices,
        }
    }

    fn customer() -> CustomerInfo {
        CustomerInfo {
            name: "Hoa".into(),
            email: None,
            phone: "0912345678".into(),
            address: "5 Trang Tien, Hanoi".into(),
        }
    }

    struct FakeConfirmer {
        reference: String,
        succeed: bool,
        calls: AtomicUsize,
    }

    impl FakeConfirmer {
        fn new(reference: &str, succeed: bool) -> Self {
            Self {
                reference: reference.to_string(),
                succeed,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentConfirmer for FakeConfirmer {
        fn flow(&self) -> ConfirmationFlow {
            ConfirmationFlow::CaptureThenConfirm
        }

        fn channel(&self) -> PaymentChannel {
            PaymentChannel::Paypal
        }

        fn gateway_reference(&self) -> &str {
            &self.reference
        }

        async fn confirm(&self, quote: &CartView) -> CheckoutResult<PaymentRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.succeed {
                return Err(CheckoutError::PaymentNotCompleted {
                    reason: "status PAYER_ACTION_REQUIRED".into(),
                });
            }
            assert_eq!(quote.total, dec!(22.00));
            Ok(PaymentRecord {
                payment_reference: format!("CAP-{}", self.reference),
                completed_at: Utc::now(),
                payer_email: Some("payer@example.com".into()),
            })
        }
    }

    #[tokio::test]
    async fn test_cod_checkout_clears_cart() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();

        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();

        assert_eq!(invoice.total_amount, dec!(22.00));
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
        assert!(f.orchestrator.carts().view("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_checkout_keeps_cart() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        f.ledger.set_quantity("main", "mug", 1);

        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let err = f.orchestrator.create_invoice("s1", &request).await.unwrap_err();

        assert!(matches!(err, CheckoutError::InsufficientStock { .. }));
        assert_eq!(f.orchestrator.carts().view("s1").await.unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        let confirmer = FakeConfirmer::new("ORDER-7", true);

        let first = f.orchestrator.settle("s1", &confirmer, customer()).await.unwrap();
        assert_eq!(first.payment_status, PaymentStatus::Paid);
        assert_eq!(first.payment_reference.as_deref(), Some("CAP-ORDER-7"));
        assert_eq!(first.customer.email.as_deref(), Some("payer@example.com"));

        let second = f.orchestrator.settle("s1", &confirmer, customer()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 3);
        assert_eq!(f.invoices.len().await, 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_payment_writes_nothing() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        let confirmer = FakeConfirmer::new("ORDER-8", false);

        let err = f.orchestrator.settle("s1", &confirmer, customer()).await.unwrap_err();

        assert!(matches!(err, CheckoutError::PaymentNotCompleted { .. }));
        assert!(f.invoices.is_empty().await);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);
        assert_eq!(f.orchestrator.carts().view("s1").await.unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn test_settle_empty_cart() {
        let f = fixture();
        let confirmer = FakeConfirmer::new("ORDER-9", true);
        let err = f.orchestrator.settle("s1", &confirmer, customer()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_restores_exactly_once() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 3);

        let first = f.orchestrator.cancel_invoice(invoice.id).await.unwrap();
        assert!(first.was_applied());
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);

        let second = f.orchestrator.cancel_invoice(invoice.id).await.unwrap();
        assert!(!second.was_applied());
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);

        let stored = f.orchestrator.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Cancelled);
        assert_eq!(stored.items.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_restore_once() {
        let f = Arc::new(fixture());
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();

        let cancels: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                tokio::spawn(async move { f.orchestrator.cancel_invoice(invoice.id).await })
            })
            .collect();
        let mut applied = 0;
        for c in cancels {
            if c.await.unwrap().unwrap().was_applied() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_staff_transitions() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 1).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();

        let confirmed = f
            .orchestrator
            .update_status(invoice.id, InvoiceStatus::New, InvoiceStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.invoice_status, InvoiceStatus::Confirmed);

        // skipping a step is refused
        assert!(f
            .orchestrator
            .update_status(invoice.id, InvoiceStatus::Confirmed, InvoiceStatus::Completed)
            .await
            .is_err());

        // stale expected status is refused
        assert!(matches!(
            f.orchestrator
                .update_status(invoice.id, InvoiceStatus::New, InvoiceStatus::Confirmed)
                .await
                .unwrap_err(),
            CheckoutError::InvalidTransition { .. }
        ));

        let cancelled = f
            .orchestrator
            .update_status(invoice.id, InvoiceStatus::Confirmed, InvoiceStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.invoice_status, InvoiceStatus::Cancelled);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);

        // a stale staff cancel does not pass silently
        assert!(matches!(
            f.orchestrator
                .update_status(invoice.id, InvoiceStatus::Confirmed, InvoiceStatus::Cancelled)
                .await
                .unwrap_err(),
            CheckoutError::InvalidTransition { .. }
        ));
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_staff_cancel_requires_expected_status() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 1).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();

        assert!(f
            .orchestrator
            .update_status(invoice.id, InvoiceStatus::Processing, InvoiceStatus::Cancelled)
            .await
            .is_err());
        let stored = f.orchestrator.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::New);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_completed_invoice_cannot_be_cancelled() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 1).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();
        for (from, to) in [
            (InvoiceStatus::New, InvoiceStatus::Confirmed),
            (InvoiceStatus::Confirmed, InvoiceStatus::Processing),
            (InvoiceStatus::Processing, InvoiceStatus::Completed),
        ] {
            f.orchestrator.update_status(invoice.id, from, to).await.unwrap();
        }

        assert!(f.orchestrator.cancel_invoice(invoice.id).await.is_err());
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_sweep_cancels_abandoned_bank_transfers() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::Vnpay, customer());
        let unpaid = f.orchestrator.create_invoice("s1", &request).await.unwrap();

        f.orchestrator.carts().add("s2", "mug", 1).await.unwrap();
        let cod = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        f.orchestrator.create_invoice("s2", &cod).await.unwrap();
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 2);

        // nothing is old enough yet
        let report = f.orchestrator.sweep_abandoned(Duration::minutes(30)).await.unwrap();
        assert_eq!(report.cancelled, 0);

        let report = f.orchestrator.sweep_abandoned(Duration::seconds(-1)).await.unwrap();
        assert_eq!(report.cancelled, 1);

        let swept = f.orchestrator.invoice(unpaid.id).await.unwrap();
        assert_eq!(swept.payment_status, PaymentStatus::Failed);
        assert_eq!(swept.invoice_status, InvoiceStatus::Cancelled);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 4);
    }

    /// Ledger whose first `failures` restores error out
    struct FlakyLedger {
        inner: Arc<InMemoryInventoryLedger>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl InventoryLedger for FlakyLedger {
        async fn available(&self, location_id: &str, product_id: &str) -> CheckoutResult<u32> {
            self.inner.available(location_id, product_id).await
        }

        async fn decrement_if_available(
            &self,
            location_id: &str,
            product_id: &str,
            quantity: u32,
        ) -> CheckoutResult<u32> {
            self.inner.decrement_if_available(location_id, product_id, quantity).await
        }

        async fn restore(&self, location_id: &str, product_id: &str, quantity: u32) -> CheckoutResult<u32> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(CheckoutError::InternalInconsistency("ledger offline".into()));
            }
            self.inner.restore(location_id, product_id, quantity).await
        }

        async fn records(&self) -> CheckoutResult<Vec<crate::inventory::InventoryRecord>> {
            self.inner.records().await
        }
    }

    #[tokio::test]
    async fn test_failed_restore_is_retried_by_next_cancel() {
        let f = fixture();
        f.orchestrator.carts().add("s1", "mug", 2).await.unwrap();
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        let invoice = f.orchestrator.create_invoice("s1", &request).await.unwrap();

        let flaky = Arc::new(FlakyLedger {
            inner: f.ledger.clone(),
            failures: AtomicUsize::new(1),
        });
        let compensator = StockCompensator::new(flaky, f.invoices.clone());

        assert!(compensator.cancel(invoice.id).await.is_err());
        let stored = f.orchestrator.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Cancelled);
        assert!(!stored.items[0].stock_restored);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 3);

        let retry = compensator.cancel(invoice.id).await.unwrap();
        assert!(!retry.was_applied());
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);

        compensator.cancel(invoice.id).await.unwrap();
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);
        let stored = f.orchestrator.invoice(invoice.id).await.unwrap();
        assert!(stored.items[0].stock_restored);
    }
}
