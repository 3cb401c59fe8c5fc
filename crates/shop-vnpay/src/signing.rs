//! # VNPay Signing
//!
//! Canonical parameter encoding and HMAC-SHA512 signatures.
//!
//! The signed string is every non-empty `vnp_*` parameter except the hash
//! fields, sorted by name and form-urlencoded (`k=v&k=v`, spaces as `+`).
//! The same string is used for the redirect URL's query.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use shop_core::{CheckoutError, CheckoutResult};
use std::collections::BTreeMap;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

/// Parameters that take part in the signature, sorted by name
pub fn signable<'a, I>(params: I) -> BTreeMap<&'a str, &'a str>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    params
        .into_iter()
        .filter(|(k, v)| {
            k.starts_with("vnp_") && *k != SECURE_HASH && *k != SECURE_HASH_TYPE && !v.is_empty()
        })
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

/// `k=v&k=v` with form-urlencoded keys and values
pub fn canonical_query(params: &BTreeMap<&str, &str>) -> CheckoutResult<String> {
    serde_urlencoded::to_string(params)
        .map_err(|e| CheckoutError::Serialization(format!("Failed to encode VNPay params: {}", e)))
}

fn mac(secret: &str) -> CheckoutResult<HmacSha512> {
    HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| CheckoutError::Configuration(format!("Invalid VNPay hash secret: {}", e)))
}

/// Lowercase hex HMAC-SHA512 of `data`
pub fn sign(secret: &str, data: &str) -> CheckoutResult<String> {
    let mut mac = mac(secret)?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature (either case) over `data`
pub fn verify(secret: &str, data: &str, signature_hex: &str) -> CheckoutResult<()> {
    let supplied = hex::decode(signature_hex).map_err(|_| CheckoutError::InvalidSignature)?;
    let mut mac = mac(secret)?;
    mac.update(data.as_bytes());
    mac.verify_slice(&supplied)
        .map_err(|_| CheckoutError::InvalidSignature)
}
