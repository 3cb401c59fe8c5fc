//! # Invoice Factory
//!
//! Turns a cart snapshot into a persisted invoice. The sequence is
//! re-price, decrement every line, persist. Once any decrement has been
//! applied, every failure path restores the applied lines before the error
//! is returned, so a failed checkout leaves the ledger as it found it.

use crate::cart::{Cart, CartLine, CartView};
use crate::error::{CheckoutError, CheckoutResult};
use crate::inventory::InventoryLedger;
use crate::invoice::{
    CustomerInfo, Invoice, InvoiceCodeGenerator, InvoiceItem, InvoiceStatus, InvoiceStore,
    PaymentChannel, PaymentMethod, PaymentStatus,
};
use crate::product::PriceLookup;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Attempts at finding a free invoice code before giving up
const MAX_CODE_ATTEMPTS: usize = 5;

/// Payment and customer metadata supplied at checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub payment_method: PaymentMethod,
    pub payment_channel: PaymentChannel,
    pub customer: CustomerInfo,
}

impl InvoiceRequest {
    pub fn new(payment_channel: PaymentChannel, customer: CustomerInfo) -> Self {
        Self {
            payment_method: payment_channel.method(),
            payment_channel,
            customer,
        }
    }

    /// Method/channel pairing plus customer fields
    pub fn validate(&self) -> CheckoutResult<()> {
        if self.payment_channel.method() != self.payment_method {
            return Err(CheckoutError::Validation(format!(
                "Payment channel {} cannot be used with payment method {:?}",
                self.payment_channel.as_str(),
                self.payment_method
            )));
        }
        self.customer.validate()
    }
}

/// A cart line priced from the catalog, with its fulfilling location
#[derive(Debug, Clone)]
struct PricedLine {
    line: CartLine,
    location_id: String,
}

/// A decrement that has been applied and may need undoing
#[derive(Debug)]
struct AppliedDecrement {
    location_id: String,
    product_id: String,
    quantity: u32,
    remaining: u32,
}

/// Creates invoices from carts
pub struct InvoiceFactory {
    catalog: Arc<dyn PriceLookup>,
    ledger: Arc<dyn InventoryLedger>,
    invoices: Arc<dyn InvoiceStore>,
    codes: InvoiceCodeGenerator,
}

impl InvoiceFactory {
    pub fn new(
        catalog: Arc<dyn PriceLookup>,
        ledger: Arc<dyn InventoryLedger>,
        invoices: Arc<dyn InvoiceStore>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            invoices,
            codes: InvoiceCodeGenerator,
        }
    }

    /// Fresh invoice code, used by gateways as a checkout reference
    pub fn preview_code(&self) -> String {
        self.codes.generate(Utc::now())
    }

    async fn reprice(&self, cart: &Cart) -> CheckoutResult<Vec<PricedLine>> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let mut priced = Vec::with_capacity(cart.lines.len());
        for stored in &cart.lines {
            let product = self.catalog.current(&stored.product_id).await?;
            priced.push(PricedLine {
                line: CartLine::from_product(&product, stored.quantity),
                location_id: product.location_id,
            });
        }

        let currency = priced[0].line.currency;
        if let Some(other) = priced.iter().find(|p| p.line.currency != currency) {
            return Err(CheckoutError::Validation(format!(
                "Product {} is now priced in {}, cart is in {}",
                other.line.product_id, other.line.currency, currency
            )));
        }
        Ok(priced)
    }

    /// Authoritative totals for a cart at current catalog prices
    pub async fn quote(&self, cart: &Cart) -> CheckoutResult<CartView> {
        let priced = self.reprice(cart).await?;
        let repriced = Cart {
            lines: priced.into_iter().map(|p| p.line).collect(),
            ..cart.clone()
        };
        Ok(repriced.view())
    }

    async fn rollback(&self, applied: &[AppliedDecrement]) {
        for d in applied.iter().rev() {
            if let Err(e) = self
                .ledger
                .restore(&d.location_id, &d.product_id, d.quantity)
                .await
            {
                error!(
                    location_id = %d.location_id,
                    product_id = %d.product_id,
                    quantity = d.quantity,
                    error = %e,
                    "Failed to roll back stock decrement"
                );
            }
        }
    }

    /// Create an invoice from `cart`.
    ///
    /// `gateway_reference` binds the invoice to a provider checkout; a second
    /// invoice for the same reference fails with `DuplicateGatewayReference`
    /// after its decrements have been rolled back.
    #[instrument(skip(self, cart, request), fields(channel = request.payment_channel.as_str()))]
    pub async fn create(
        &self,
        cart: &Cart,
        request: &InvoiceRequest,
        gateway_reference: Option<&str>,
    ) -> CheckoutResult<Invoice> {
        request.validate()?;
        let mut priced = self.reprice(cart).await?;
        // one global row order, so two carts never each hold half of what both need
        priced.sort_by(|a, b| {
            (a.location_id.as_str(), a.line.product_id.as_str())
                .cmp(&(b.location_id.as_str(), b.line.product_id.as_str()))
        });

        let mut applied: Vec<AppliedDecrement> = Vec::with_capacity(priced.len());
        for p in &priced {
            match self
                .ledger
                .decrement_if_available(&p.location_id, &p.line.product_id, p.line.quantity)
                .await
            {
                Ok(remaining) => applied.push(AppliedDecrement {
                    location_id: p.location_id.clone(),
                    product_id: p.line.product_id.clone(),
                    quantity: p.line.quantity,
                    remaining,
                }),
                Err(e) => {
                    warn!(product_id = %p.line.product_id, error = %e, "Stock decrement failed");
                    self.rollback(&applied).await;
                    return Err(e);
                }
            }
        }

        let mut invoice = build_invoice(&priced, &applied, request, gateway_reference);

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            invoice.invoice_code = self.codes.generate(invoice.created_at);
            match self.invoices.insert(invoice.clone()).await {
                Ok(()) => {
                    info!(
                        invoice_id = %invoice.id,
                        code = %invoice.invoice_code,
                        total = %invoice.total_amount,
                        currency = %invoice.currency,
                        "Invoice created"
                    );
                    return Ok(invoice);
                }
                Err(CheckoutError::DuplicateInvoiceCode { code }) => {
                    warn!(code, attempt, "Invoice code collision, regenerating");
                }
                Err(e) => {
                    self.rollback(&applied).await;
                    return Err(e);
                }
            }
        }

        self.rollback(&applied).await;
        Err(CheckoutError::InternalInconsistency(
            "Could not allocate a unique invoice code".to_string(),
        ))
    }
}

fn build_invoice(
    priced: &[PricedLine],
    applied: &[AppliedDecrement],
    request: &InvoiceRequest,
    gateway_reference: Option<&str>,
) -> Invoice {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let currency = priced[0].line.currency;

    let items: Vec<InvoiceItem> = priced
        .iter()
        .zip(applied)
        .map(|(p, d)| InvoiceItem {
            invoice_id: id,
            product_id: p.line.product_id.clone(),
            location_id: p.location_id.clone(),
            product_name_snapshot: p.line.name.clone(),
            sku_snapshot: p.line.sku.clone(),
            quantity: p.line.quantity,
            unit_price_before_tax: p.line.unit_price_before_tax,
            tax_rate_percent: p.line.tax_rate_percent,
            tax_amount: p.line.tax_amount(),
            line_total_amount: p.line.line_total(),
            remaining_quantity_after_sale: d.remaining,
            stock_restored: false,
        })
        .collect();

    let sub_total: Decimal = priced.iter().map(|p| p.line.subtotal()).sum();
    let tax_total: Decimal = items.iter().map(|i| i.tax_amount).sum();

    Invoice {
        id,
        invoice_code: String::new(),
        sub_total,
        tax_total,
        total_amount: sub_total + tax_total,
        currency,
        payment_method: request.payment_method,
        payment_channel: request.payment_channel,
        payment_status: PaymentStatus::Pending,
        invoice_status: InvoiceStatus::New,
        gateway_reference: gateway_reference.map(String::from),
        payment_reference: None,
        payment_completed_at: None,
        customer: request.customer.clone(),
        items,
        created_at: now,
        updated_at: now,
    }
}

impl std::fmt::Debug for InvoiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceFactory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InMemoryInventoryLedger;
    use crate::invoice::InMemoryInvoiceStore;
    use crate::product::{Currency, Price, Product, ProductCatalog};
    use rust_decimal_macros::dec;

    struct Fixture {
        factory: InvoiceFactory,
        ledger: Arc<InMemoryInventoryLedger>,
        invoices: Arc<InMemoryInvoiceStore>,
        catalog: ProductCatalog,
    }

    fn fixture() -> Fixture {
        let catalog = ProductCatalog::new()
            .with_product(Product::new(
                "mug",
                "MUG-1",
                "Mug",
                Price::new(dec!(10.00), Currency::USD),
                dec!(10),
            ))
            .with_product(
                Product::new(
                    "lamp",
                    "LAMP-1",
                    "Lamp",
                    Price::new(dec!(3.33), Currency::USD),
                    dec!(8),
                )
                .at_location("warehouse-2"),
            );
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        ledger.set_quantity("main", "mug", 5);
        ledger.set_quantity("warehouse-2", "lamp", 1);
        let invoices = Arc::new(InMemoryInvoiceStore::new());
        let factory = InvoiceFactory::new(
            Arc::new(catalog.clone()),
            ledger.clone(),
            invoices.clone(),
        );
        Fixture {
            factory,
            ledger,
            invoices,
            catalog,
        }
    }

    fn customer() -> CustomerInfo {
        CustomerInfo {
            name: "Minh".into(),
            email: Some("minh@example.com".into()),
            phone: "0901234567".into(),
            address: "12 Ly Thai To, Hanoi".into(),
        }
    }

    fn cart_of(catalog: &ProductCatalog, lines: &[(&str, u32)]) -> Cart {
        let mut cart = Cart::new();
        for (id, qty) in lines {
            cart.put(catalog.get(id).unwrap(), *qty).unwrap();
        }
        cart
    }

    #[tokio::test]
    async fn test_cod_invoice_totals() {
        let f = fixture();
        let cart = cart_of(&f.catalog, &[("mug", 2)]);
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());

        let invoice = f.factory.create(&cart, &request, None).await.unwrap();

        assert_eq!(invoice.sub_total, dec!(20.00));
        assert_eq!(invoice.tax_total, dec!(2.00));
        assert_eq!(invoice.total_amount, dec!(22.00));
        assert_eq!(invoice.invoice_status, InvoiceStatus::New);
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
        assert_eq!(invoice.payment_method, PaymentMethod::Cod);
        assert_eq!(invoice.items[0].remaining_quantity_after_sale, 3);
        assert!(invoice.is_balanced());
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_line_leaves_ledger_untouched() {
        let f = fixture();
        let before = f.ledger.records().await.unwrap();
        // mug decrements first, then lamp fails
        let cart = cart_of(&f.catalog, &[("mug", 2), ("lamp", 2)]);
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());

        let err = f.factory.create(&cart, &request, None).await.unwrap_err();

        assert!(matches!(err, CheckoutError::InsufficientStock { ref product_id } if product_id == "lamp"));
        assert_eq!(f.ledger.records().await.unwrap(), before);
        assert!(f.invoices.is_empty().await);
    }

    #[tokio::test]
    async fn test_line_totals_sum_to_invoice_total() {
        let f = fixture();
        let cart = cart_of(&f.catalog, &[("mug", 3), ("lamp", 1)]);
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());

        let invoice = f.factory.create(&cart, &request, None).await.unwrap();

        let lines: Decimal = invoice.items.iter().map(|i| i.line_total_amount).sum();
        assert_eq!(lines, invoice.total_amount);
        assert_eq!(invoice.sub_total + invoice.tax_total, invoice.total_amount);
        assert_eq!(invoice.items[1].location_id, "warehouse-2");
    }

    #[tokio::test]
    async fn test_reprices_from_catalog() {
        let f = fixture();
        let mut cart = cart_of(&f.catalog, &[("mug", 1)]);
        cart.lines[0].unit_price_before_tax = dec!(0.01);
        let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());

        let invoice = f.factory.create(&cart, &request, None).await.unwrap();
        assert_eq!(invoice.sub_total, dec!(10.00));
    }

    #[tokio::test]
    async fn test_duplicate_gateway_reference_rolls_back() {
        let f = fixture();
        let cart = cart_of(&f.catalog, &[("mug", 1)]);
        let request = InvoiceRequest::new(PaymentChannel::Paypal, customer());

        f.factory.create(&cart, &request, Some("ORDER-1")).await.unwrap();
        let err = f
            .factory
            .create(&cart, &request, Some("ORDER-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::DuplicateGatewayReference { .. }));
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 4);
        assert_eq!(f.invoices.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let f = fixture();
        let cart = cart_of(&f.catalog, &[("mug", 1)]);

        let mut mismatched = InvoiceRequest::new(PaymentChannel::Vnpay, customer());
        mismatched.payment_method = PaymentMethod::Cod;
        assert!(matches!(
            f.factory.create(&cart, &mismatched, None).await.unwrap_err(),
            CheckoutError::Validation(_)
        ));

        let mut no_phone = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        no_phone.customer.phone = String::new();
        assert!(f.factory.create(&cart, &no_phone, None).await.is_err());

        let empty = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
        assert!(matches!(
            f.factory.create(&Cart::new(), &empty, None).await.unwrap_err(),
            CheckoutError::EmptyCart
        ));
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_do_not_oversell() {
        let f = Arc::new(fixture());
        let cart = cart_of(&f.catalog, &[("lamp", 1)]);

        let attempts: Vec<_> = (0..12)
            .map(|_| {
                let f = f.clone();
                let cart = cart.clone();
                tokio::spawn(async move {
                    let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
                    f.factory.create(&cart, &request, None).await
                })
            })
            .collect();

        let mut created = 0;
        let mut insufficient = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(CheckoutError::InsufficientStock { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(insufficient, 11);
        assert_eq!(f.ledger.available("warehouse-2", "lamp").await.unwrap(), 0);
        assert_eq!(f.invoices.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_line_orders_still_sell() {
        let f = Arc::new(fixture());
        f.ledger.set_quantity("main", "mug", 1);
        let forward = cart_of(&f.catalog, &[("mug", 1), ("lamp", 1)]);
        let backward = cart_of(&f.catalog, &[("lamp", 1), ("mug", 1)]);

        let attempts: Vec<_> = [forward, backward]
            .into_iter()
            .cycle()
            .take(8)
            .map(|cart| {
                let f = f.clone();
                tokio::spawn(async move {
                    let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer());
                    f.factory.create(&cart, &request, None).await
                })
            })
            .collect();

        let mut created = Vec::new();
        for attempt in attempts {
            if let Ok(invoice) = attempt.await.unwrap() {
                created.push(invoice);
            }
        }

        assert_eq!(created.len(), 1);
        let products: Vec<_> = created[0].items.iter().map(|i| i.product_id.as_str()).collect();
        assert_eq!(products, ["mug", "lamp"]);
        assert_eq!(f.ledger.available("main", "mug").await.unwrap(), 0);
        assert_eq!(f.ledger.available("warehouse-2", "lamp").await.unwrap(), 0);
    }
}
