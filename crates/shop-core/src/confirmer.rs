//! # Payment Confirmer Trait
//!
//! Seam between the settlement orchestrator and the payment gateways.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentConfirmer (trait)                   │
//! │  ├── flow()                                                 │
//! │  ├── gateway_reference()                                    │
//! │  └── confirm(quote)                                         │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                 ┌──────────┴──────────┐
//!                 │                     │
//!       ┌─────────┴─────────┐ ┌─────────┴─────────┐
//!       │ VerifiedCallback  │ │  PaypalCapture    │
//!       │ (redirect, VNPay) │ │ (capture, PayPal) │
//!       └───────────────────┘ └───────────────────┘
//! ```
//!
//! The orchestrator runs the same sequence for both: look for an invoice
//! already bound to the gateway reference, ask the confirmer, then hand the
//! cart to the invoice factory. Whatever a gateway must check before money is
//! considered received happens inside `confirm`, and a failing `confirm`
//! leaves no local writes behind.

use crate::cart::CartView;
use crate::error::CheckoutResult;
use crate::invoice::{PaymentChannel, PaymentRecord};
use crate::product::Currency;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a gateway proves the payment before the invoice exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationFlow {
    /// Provider already settled; its signed callback is checked locally
    PreVerifiedRedirect,
    /// Money moves only when we ask the provider to capture
    CaptureThenConfirm,
}

/// Gateway-side confirmation of one checkout attempt
#[async_trait]
pub trait PaymentConfirmer: Send + Sync {
    fn flow(&self) -> ConfirmationFlow;

    /// Channel stamped on the resulting invoice
    fn channel(&self) -> PaymentChannel;

    /// Provider identifier of the checkout attempt; at most one invoice binds to it
    fn gateway_reference(&self) -> &str;

    /// Confirm that the provider holds payment for `quote`.
    ///
    /// Fails with `PaymentNotCompleted` when the provider reports anything
    /// but success, `UpstreamUnavailable` when it cannot be reached.
    async fn confirm(&self, quote: &CartView) -> CheckoutResult<PaymentRecord>;
}

/// Where to send the customer to pay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRedirect {
    pub channel: PaymentChannel,
    /// Reference the provider will echo back (VNPay txn ref, PayPal order id)
    pub gateway_reference: String,
    pub redirect_url: String,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_redirect_serialization() {
        let redirect = PaymentRedirect {
            channel: PaymentChannel::Paypal,
            gateway_reference: "5O190127TN364715T".into(),
            redirect_url: "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T".into(),
            amount: dec!(22.00),
            currency: Currency::USD,
            expires_at: None,
        };

        let json = serde_json::to_value(&redirect).unwrap();
        assert_eq!(json["channel"], "PAYPAL");
        assert_eq!(json["currency"], "USD");
        assert!(json.get("expires_at").is_none());
    }

    #[test]
    fn test_flow_names() {
        assert_eq!(
            serde_json::to_string(&ConfirmationFlow::CaptureThenConfirm).unwrap(),
            "\"capture_then_confirm\""
        );
    }
}
