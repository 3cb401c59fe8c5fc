//! # Checkout Error Types
//!
//! Typed error handling for the storefront checkout core.
//! All cart, invoice and settlement operations return `Result<T, CheckoutError>`.

use thiserror::Error;

/// Message shown to callers when a gateway refuses to confirm a payment.
pub const PAYMENT_NOT_CONFIRMED: &str = "Payment not confirmed";

/// Core error type for all checkout operations
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bad input shape or range
    #[error("Validation error: {0}")]
    Validation(String),

    /// Product unknown to the catalog or no longer sellable
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// Advisory stock check failed while mutating a cart
    #[error("Out of stock: {product_id} (requested {requested}, available {available})")]
    OutOfStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    /// Authoritative stock check failed while creating an invoice
    #[error("Insufficient stock: {product_id}")]
    InsufficientStock { product_id: String },

    /// Currency not accepted by a gateway or converter
    #[error("Unsupported currency: {currency} (expected {expected})")]
    UnsupportedCurrency { currency: String, expected: String },

    /// Nothing to check out
    #[error("Cart is empty")]
    EmptyCart,

    /// Gateway callback signature did not match
    #[error("Invalid signature")]
    InvalidSignature,

    /// Provider did not report the payment as completed
    #[error("Payment not completed: {reason}")]
    PaymentNotCompleted { reason: String },

    /// Provider network failure, 5xx, or malformed response
    #[error("Upstream unavailable [{provider}]: {message}")]
    UpstreamUnavailable { provider: String, message: String },

    /// Invoice id unknown to the store
    #[error("Invoice not found: {invoice_id}")]
    InvoiceNotFound { invoice_id: String },

    /// Status change rejected because the current status did not match
    #[error("Invalid transition for invoice {invoice_id}: {from} -> {to}")]
    InvalidTransition {
        invoice_id: String,
        from: String,
        to: String,
    },

    /// Generated invoice code already taken
    #[error("Duplicate invoice code: {code}")]
    DuplicateInvoiceCode { code: String },

    /// Provider reference already bound to an invoice
    #[error("Gateway reference already settled: {reference}")]
    DuplicateGatewayReference { reference: String },

    /// State that should be impossible (row missing right after creation, etc.)
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CheckoutError {
    /// Shorthand for an upstream failure attributed to `provider`
    pub fn upstream(provider: &str, message: impl Into<String>) -> Self {
        CheckoutError::UpstreamUnavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Returns true if the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::UpstreamUnavailable { .. })
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::Configuration(_) => 500,
            CheckoutError::Validation(_) => 400,
            CheckoutError::ProductNotFound { .. } => 404,
            CheckoutError::OutOfStock { .. } => 409,
            CheckoutError::InsufficientStock { .. } => 409,
            CheckoutError::UnsupportedCurrency { .. } => 400,
            CheckoutError::EmptyCart => 400,
            CheckoutError::InvalidSignature => 400,
            CheckoutError::PaymentNotCompleted { .. } => 402,
            CheckoutError::UpstreamUnavailable { .. } => 503,
            CheckoutError::InvoiceNotFound { .. } => 404,
            CheckoutError::InvalidTransition { .. } => 409,
            CheckoutError::DuplicateInvoiceCode { .. } => 409,
            CheckoutError::DuplicateGatewayReference { .. } => 409,
            CheckoutError::InternalInconsistency(_) => 500,
            CheckoutError::Serialization(_) => 500,
        }
    }

    /// Message safe to hand back to an end user.
    ///
    /// Verification failures collapse into one generic message so nothing about
    /// the signature or provider state leaks; internal failures are not echoed.
    pub fn public_message(&self) -> String {
        match self {
            CheckoutError::InvalidSignature | CheckoutError::PaymentNotCompleted { .. } => {
                PAYMENT_NOT_CONFIRMED.to_string()
            }
            CheckoutError::InternalInconsistency(_)
            | CheckoutError::Configuration(_)
            | CheckoutError::Serialization(_) => "Internal error".to_string(),
            CheckoutError::UpstreamUnavailable { provider, .. } => {
                format!("Payment provider {} is unavailable, please retry", provider)
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(CheckoutError::upstream("paypal", "timeout").is_retryable());
        assert!(!CheckoutError::InvalidSignature.is_retryable());
        assert!(!CheckoutError::Validation("bad data".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(CheckoutError::Validation("test".into()).status_code(), 400);
        assert_eq!(
            CheckoutError::InsufficientStock {
                product_id: "p1".into()
            }
            .status_code(),
            409
        );
        assert_eq!(
            CheckoutError::PaymentNotCompleted {
                reason: "PENDING".into()
            }
            .status_code(),
            402
        );
    }

    #[test]
    fn test_public_message_hides_verification_details() {
        assert_eq!(
            CheckoutError::InvalidSignature.public_message(),
            PAYMENT_NOT_CONFIRMED
        );
        assert_eq!(
            CheckoutError::PaymentNotCompleted {
                reason: "vnp_ResponseCode=24".into()
            }
            .public_message(),
            PAYMENT_NOT_CONFIRMED
        );
    }

    #[test]
    fn test_public_message_names_short_product() {
        let msg = CheckoutError::InsufficientStock {
            product_id: "kettle-01".into(),
        }
        .public_message();
        assert!(msg.contains("kettle-01"));
    }
}
