//! Webhook source validation (X-Hub-Signature-256).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of the body>`.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Hex digits in an HMAC-SHA256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Check `header` (`sha256=<hex>`) against the HMAC of `payload` under `secret`.
///
/// An empty secret disables the check (a warning is logged at startup).
/// The comparison is constant time.
pub fn validate_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(digest) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    if digest.len() != DIGEST_HEX_LEN {
        return false;
    }
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
