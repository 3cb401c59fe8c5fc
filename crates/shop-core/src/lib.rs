//! # shop-core
//!
//! Core types and services for the storefront checkout engine.
//!
//! This crate provides:
//! - `Product`, `ProductCatalog` and `PriceLookup` for current prices
//! - `CurrencyConverter` for display-currency previews
//! - `CartService` for session-scoped carts
//! - `InventoryLedger` for per-location stock
//! - `InvoiceFactory` and `InvoiceStore` for durable invoices
//! - `PaymentConfirmer` trait implemented by each payment gateway
//! - `SettlementOrchestrator` tying cart, invoice and payment together
//! - `CheckoutError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use shop_core::{CustomerInfo, InvoiceRequest, PaymentChannel};
//!
//! orchestrator.carts().add(&session_id, "kettle-01", 2).await?;
//!
//! // Cash on delivery: invoice straight from the cart
//! let request = InvoiceRequest::new(PaymentChannel::CashOnDelivery, customer);
//! let invoice = orchestrator.create_invoice(&session_id, &request).await?;
//!
//! // Gateway payment: the gateway's confirmer proves payment first
//! let invoice = orchestrator.settle(&session_id, &confirmer, customer).await?;
//! ```

pub mod cart;
pub mod confirmer;
pub mod currency;
pub mod error;
pub mod factory;
pub mod inventory;
pub mod invoice;
pub mod notify;
pub mod product;
pub mod settlement;

// Re-exports for convenience
pub use cart::{
    Cart, CartLine, CartLineView, CartService, CartStore, CartView, InMemoryCartStore,
};
pub use confirmer::{ConfirmationFlow, PaymentConfirmer, PaymentRedirect};
pub use currency::{CurrencyConverter, ExchangeRateSource, StaticRateSource};
pub use error::{CheckoutError, CheckoutResult, PAYMENT_NOT_CONFIRMED};
pub use factory::{InvoiceFactory, InvoiceRequest};
pub use inventory::{InMemoryInventoryLedger, InventoryKey, InventoryLedger, InventoryRecord};
pub use invoice::{
    CustomerInfo, InMemoryInvoiceStore, Invoice, InvoiceItem, InvoiceStatus, InvoiceStore,
    PaymentChannel, PaymentMethod, PaymentRecord, PaymentStatus, Transition,
};
pub use notify::{InvoiceNotifier, LoggingNotifier};
pub use product::{Currency, Price, PriceLookup, Product, ProductCatalog, DEFAULT_LOCATION};
pub use settlement::{SettlementOrchestrator, StockCompensator, SweepReport};
