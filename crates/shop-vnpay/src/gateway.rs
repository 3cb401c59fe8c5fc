//! # VNPay Redirect Gateway
//!
//! Implementation of the VNPay 2.1.0 payment-URL flow.
//!
//! ```text
//! INIT ─► URL_ISSUED ─► (customer pays on VNPay) ─► CALLBACK_RECEIVED
//!                                                      │
//!                           ┌──────────────────────────┼──────────────┐
//!                           ▼                          ▼              ▼
//!                    VERIFIED_SUCCESS           VERIFIED_FAILED    TAMPERED
//!                    (confirm succeeds)   (PaymentNotCompleted) (InvalidSignature)
//! ```
//!
//! No invoice exists until a callback has been verified; an abandoned
//! redirect leaves nothing behind.

use crate::config::VnpayConfig;
use crate::signing::{self, SECURE_HASH};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use rust_decimal::Decimal;
use shop_core::{
    CartView, CheckoutError, CheckoutResult, ConfirmationFlow, Currency, PaymentChannel,
    PaymentConfirmer, PaymentRecord, PaymentRedirect,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument, warn};

const VERSION: &str = "2.1.0";
const COMMAND_PAY: &str = "pay";
const ORDER_TYPE: &str = "other";
const SUCCESS_CODE: &str = "00";
const DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// VNPay timestamps are Vietnam local time
fn vietnam_time(at: DateTime<Utc>) -> CheckoutResult<String> {
    let offset = FixedOffset::east_opt(7 * 3600)
        .ok_or_else(|| CheckoutError::Configuration("Invalid GMT+7 offset".to_string()))?;
    Ok(at.with_timezone(&offset).format(DATE_FORMAT).to_string())
}

/// VNPay wants the VND amount multiplied by 100
fn vnp_amount(total: Decimal) -> CheckoutResult<i64> {
    Currency::VND
        .to_minor_units(total)?
        .checked_mul(100)
        .ok_or_else(|| CheckoutError::Validation(format!("Amount {} too large for VNPay", total)))
}

/// VNPay bank-redirect gateway
#[derive(Debug, Clone)]
pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> Self {
        Self { config }
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Ok(Self::new(VnpayConfig::from_env()?))
    }

    pub fn config(&self) -> &VnpayConfig {
        &self.config
    }

    /// Build the signed redirect URL for a quoted cart.
    ///
    /// `txn_ref` is echoed back in the callback and becomes the invoice's
    /// gateway reference.
    #[instrument(skip(self, quote), fields(total = %quote.total))]
    pub fn create_payment_url(
        &self,
        quote: &CartView,
        txn_ref: &str,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> CheckoutResult<PaymentRedirect> {
        let currency = quote.require_currency()?;
        if currency != Currency::VND {
            return Err(CheckoutError::UnsupportedCurrency {
                currency: currency.to_string(),
                expected: Currency::VND.to_string(),
            });
        }
        if quote.total <= Decimal::ZERO {
            return Err(CheckoutError::Validation(
                "Payment amount must be positive".to_string(),
            ));
        }

        let expires_at = now + Duration::minutes(self.config.expire_minutes);
        let params: Vec<(String, String)> = vec![
            ("vnp_Version".into(), VERSION.into()),
            ("vnp_Command".into(), COMMAND_PAY.into()),
            ("vnp_TmnCode".into(), self.config.tmn_code.clone()),
            ("vnp_Amount".into(), vnp_amount(quote.total)?.to_string()),
            ("vnp_CurrCode".into(), Currency::VND.to_string()),
            ("vnp_TxnRef".into(), txn_ref.to_string()),
            ("vnp_OrderInfo".into(), format!("Thanh toan don hang {}", txn_ref)),
            ("vnp_OrderType".into(), ORDER_TYPE.into()),
            ("vnp_Locale".into(), self.config.locale.clone()),
            ("vnp_ReturnUrl".into(), self.config.return_url.clone()),
            ("vnp_IpAddr".into(), client_ip.to_string()),
            ("vnp_CreateDate".into(), vietnam_time(now)?),
            ("vnp_ExpireDate".into(), vietnam_time(expires_at)?),
        ];

        let query = signing::canonical_query(&signing::signable(params.iter().map(|(k, v)| (k, v))))?;
        let secure_hash = signing::sign(&self.config.hash_secret, &query)?;
        let redirect_url = format!(
            "{}?{}&{}={}",
            self.config.pay_url, query, SECURE_HASH, secure_hash
        );

        info!(txn_ref, amount = %quote.total, "Issued VNPay payment URL");
        Ok(PaymentRedirect {
            channel: PaymentChannel::Vnpay,
            gateway_reference: txn_ref.to_string(),
            redirect_url,
            amount: quote.total,
            currency,
            expires_at: Some(expires_at),
        })
    }

    /// Authenticate callback parameters.
    ///
    /// Recomputes the signature over every signed parameter and rejects any
    /// mismatch with `InvalidSignature`. Only a verified callback can confirm
    /// a payment.
    #[instrument(skip(self, params))]
    pub fn verify_callback(&self, params: &HashMap<String, String>) -> CheckoutResult<VerifiedCallback> {
        let supplied = params.get(SECURE_HASH).ok_or_else(|| {
            warn!("VNPay callback without signature");
            CheckoutError::InvalidSignature
        })?;

        let signed = signing::signable(params);
        let query = signing::canonical_query(&signed)?;
        if let Err(e) = signing::verify(&self.config.hash_secret, &query, supplied) {
            warn!("VNPay callback signature mismatch");
            return Err(e);
        }

        let callback = VerifiedCallback::from_params(&signed)?;
        debug!(
            txn_ref = %callback.txn_ref,
            response_code = %callback.response_code,
            "Verified VNPay callback"
        );
        Ok(callback)
    }
}

/// Callback whose signature has been checked.
///
/// Only `VnpayGateway::verify_callback` constructs one, so holding a value
/// means the parameters are authentic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub txn_ref: String,
    pub response_code: String,
    pub transaction_status: Option<String>,
    pub transaction_no: Option<String>,
    /// VND x 100, as sent by VNPay
    pub amount: i64,
    pub bank_code: Option<String>,
    pub pay_date: Option<String>,
}

impl VerifiedCallback {
    fn from_params(signed: &BTreeMap<&str, &str>) -> CheckoutResult<Self> {
        let field = |name: &str| signed.get(name).map(|v| v.to_string());
        let required = |name: &str| {
            field(name).ok_or_else(|| {
                CheckoutError::upstream("vnpay", format!("Callback missing {}", name))
            })
        };

        let amount = required("vnp_Amount")?.parse::<i64>().map_err(|_| {
            CheckoutError::upstream("vnpay", "Callback vnp_Amount is not an integer")
        })?;

        Ok(Self {
            txn_ref: required("vnp_TxnRef")?,
            response_code: required("vnp_ResponseCode")?,
            transaction_status: field("vnp_TransactionStatus"),
            transaction_no: field("vnp_TransactionNo"),
            amount,
            bank_code: field("vnp_BankCode"),
            pay_date: field("vnp_PayDate"),
        })
    }

    /// Provider reported success
    pub fn is_success(&self) -> bool {
        self.response_code == SUCCESS_CODE
            && self
                .transaction_status
                .as_deref()
                .map_or(true, |status| status == SUCCESS_CODE)
    }
}

#[async_trait]
impl PaymentConfirmer for VerifiedCallback {
    fn flow(&self) -> ConfirmationFlow {
        ConfirmationFlow::PreVerifiedRedirect
    }

    fn channel(&self) -> PaymentChannel {
        PaymentChannel::Vnpay
    }

    fn gateway_reference(&self) -> &str {
        &self.txn_ref
    }

    async fn confirm(&self, quote: &CartView) -> CheckoutResult<PaymentRecord> {
        if !self.is_success() {
            return Err(CheckoutError::PaymentNotCompleted {
                reason: format!(
                    "VNPay response code {} (status {})",
                    self.response_code,
                    self.transaction_status.as_deref().unwrap_or("-")
                ),
            });
        }

        let currency = quote.require_currency()?;
        if currency != Currency::VND {
            return Err(CheckoutError::UnsupportedCurrency {
                currency: currency.to_string(),
                expected: Currency::VND.to_string(),
            });
        }

        let expected = vnp_amount(quote.total)?;
        if expected != self.amount {
            warn!(expected, paid = self.amount, txn_ref = %self.txn_ref, "VNPay amount mismatch");
            return Err(CheckoutError::PaymentNotCompleted {
                reason: "Paid amount does not match cart total".to_string(),
            });
        }

        let transaction_no = self
            .transaction_no
            .clone()
            .ok_or_else(|| CheckoutError::upstream("vnpay", "Callback missing vnp_TransactionNo"))?;

        Ok(PaymentRecord {
            payment_reference: transaction_no,
            completed_at: Utc::now(),
            payer_email: None,
        })
    }
}
