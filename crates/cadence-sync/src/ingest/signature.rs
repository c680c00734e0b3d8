//! Webhook signature verification.
//!
//! Every inbound webhook is authenticated by an HMAC-SHA256 keyed
//! signature over the raw payload bytes, delivered in the
//! `X-Cadence-Signature` header as `sha256=<hex>`. Verification uses the
//! MAC's constant-time comparison; invalid signatures are rejected before
//! any processing and logged as security events by the caller.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-cadence-signature";

/// Scheme prefix on the signature value.
const SCHEME_PREFIX: &str = "sha256=";

/// Signs a payload, producing the header value (`sha256=<hex>`).
///
/// Used by tests and by trackers configured to call this service.
#[must_use]
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload);
    format!("{SCHEME_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature header value against the raw payload bytes.
///
/// Returns `false` for a missing scheme prefix, non-hex digest, or MAC
/// mismatch. Comparison is constant-time.
#[must_use]
pub fn verify_signature(secret: &[u8], payload: &[u8], provided: &str) -> bool {
    let Some(hex_digest) = provided.strip_prefix(SCHEME_PREFIX) else {
        return false;
    };
    let Ok(digest) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&digest).is_ok()
}
