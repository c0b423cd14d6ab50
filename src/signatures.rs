//! Hashing and signature checks for tokens and provider webhooks.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn hmac_sha256_hex(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex-encoded HMAC-SHA256 of `body`. Comparison happens inside
/// `verify_slice`, which is constant-time.
pub fn verify_hmac_sha256_hex(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Meta sends `X-Hub-Signature-256: sha256=<hex>`.
pub fn verify_meta_signature(app_secret: &str, body: &[u8], header: &str) -> bool {
    match header.trim().strip_prefix("sha256=") {
        Some(sig) => verify_hmac_sha256_hex(app_secret.as_bytes(), body, sig),
        None => false,
    }
}

/// Constant-time string comparison for shared secrets.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_roundtrip_and_tamper() {
        let sig = hmac_sha256_hex(b"secret", b"{\"a\":1}");
        assert!(verify_hmac_sha256_hex(b"secret", b"{\"a\":1}", &sig));
        assert!(!verify_hmac_sha256_hex(b"secret", b"{\"a\":2}", &sig));
        assert!(!verify_hmac_sha256_hex(b"other", b"{\"a\":1}", &sig));
        assert!(!verify_hmac_sha256_hex(b"secret", b"{\"a\":1}", "not-hex"));
    }

    #[test]
    fn meta_header_needs_prefix() {
        let sig = hmac_sha256_hex(b"app", b"body");
        assert!(verify_meta_signature("app", b"body", &format!("sha256={}", sig)));
        assert!(!verify_meta_signature("app", b"body", &sig));
    }

    #[test]
    fn compare() {
        assert!(constant_time_compare("token", "token"));
        assert!(!constant_time_compare("token", "tokex"));
        assert!(!constant_time_compare("token", "tokens"));
    }
}
