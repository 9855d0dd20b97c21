//! Webhook authenticity checks using HMAC-SHA256.
//!
//! GitHub signs each delivery body with the App's webhook secret and sends the
//! result in `X-Hub-Signature-256` as `sha256=<hex>`. Verification runs over the
//! exact bytes received, before anything parses them, and fails closed: a
//! missing header, a malformed header and a mismatch are all `Unauthorized`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The delivery could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unauthorized: webhook signature did not verify")]
pub struct Unauthorized;

/// Holds the shared secret and checks deliveries against it.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        SignatureVerifier {
            secret: secret.into(),
        }
    }

    /// Verifies `payload` against an optional signature header value.
    pub fn verify(&self, payload: &[u8], signature_header: Option<&str>) -> Result<(), Unauthorized> {
        match signature_header {
            Some(header) if verify_signature(payload, header, &self.secret) => Ok(()),
            _ => Err(Unauthorized),
        }
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

/// Parses a signature header (`sha256=<hex>`) into raw bytes.
///
/// Returns `None` for a missing prefix, another algorithm or invalid hex.
///
/// ```
/// use neural_review::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=abcd"), Some(vec![0xab, 0xcd]));
/// assert!(parse_signature_header("sha1=abcd").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.trim().strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats raw signature bytes as a header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies a signature header against the payload and secret.
///
/// The comparison is constant-time (`Mac::verify_slice`).
///
/// ```
/// use neural_review::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let body = br#"{"zen":"Keep it logically awesome."}"#;
/// let header = format_signature_header(&compute_signature(body, b"s3cret"));
///
/// assert!(verify_signature(body, &header, b"s3cret"));
/// assert!(!verify_signature(body, &header, b"other"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_accepts_uppercase_hex() {
        assert_eq!(
            parse_signature_header("sha256=ABCD1234"),
            Some(vec![0xab, 0xcd, 0x12, 0x34])
        );
    }

    #[test]
    fn parse_rejects_odd_length_hex() {
        assert_eq!(parse_signature_header("sha256=abc"), None);
    }

    #[test]
    fn parse_rejects_missing_prefix() {
        assert_eq!(parse_signature_header("abcd"), None);
        assert_eq!(parse_signature_header(""), None);
    }

    /// Test vector from GitHub's "validating webhook deliveries" documentation.
    #[test]
    fn github_documentation_vector() {
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_signature(
            b"Hello, World!",
            header,
            b"It's a Secret to Everybody"
        ));
    }

    #[test]
    fn modified_payload_fails() {
        let header = format_signature_header(&compute_signature(b"original", b"k"));
        assert!(verify_signature(b"original", &header, b"k"));
        assert!(!verify_signature(b"original ", &header, b"k"));
    }

    #[test]
    fn truncated_signature_fails() {
        let sig = compute_signature(b"payload", b"k");
        let header = format_signature_header(&sig[..16]);
        assert!(!verify_signature(b"payload", &header, b"k"));
    }

    #[test]
    fn verifier_fails_closed_without_header() {
        let verifier = SignatureVerifier::new(b"secret".to_vec());
        assert_eq!(verifier.verify(b"{}", None), Err(Unauthorized));
        assert_eq!(verifier.verify(b"{}", Some("")), Err(Unauthorized));
        assert_eq!(verifier.verify(b"{}", Some("sha256=")), Err(Unauthorized));
    }

    #[test]
    fn verifier_accepts_valid_signature() {
        let verifier = SignatureVerifier::new(b"secret".to_vec());
        let header = format_signature_header(&compute_signature(b"{}", b"secret"));
        assert_eq!(verifier.verify(b"{}", Some(&header)), Ok(()));
    }

    #[test]
    fn verifier_debug_hides_secret() {
        let verifier = SignatureVerifier::new(b"hunter2".to_vec());
        assert!(!format!("{:?}", verifier).contains("hunter2"));
    }

    proptest! {
        #[test]
        fn prop_sign_verify_roundtrip(payload: Vec<u8>, secret: Vec<u8>) {
            let header = format_signature_header(&compute_signature(&payload, &secret));
            prop_assert!(verify_signature(&payload, &header, &secret));
        }

        #[test]
        fn prop_wrong_secret_fails(payload: Vec<u8>, secret1: Vec<u8>, secret2: Vec<u8>) {
            prop_assume!(secret1 != secret2);
            let header = format_signature_header(&compute_signature(&payload, &secret1));
            prop_assert!(!verify_signature(&payload, &header, &secret2));
        }

        #[test]
        fn prop_modified_payload_fails(original: Vec<u8>, modified: Vec<u8>, secret: Vec<u8>) {
            prop_assume!(original != modified);
            let header = format_signature_header(&compute_signature(&original, &secret));
            prop_assert!(!verify_signature(&modified, &header, &secret));
        }

        #[test]
        fn prop_arbitrary_header_never_panics(header: String, payload: Vec<u8>, secret: Vec<u8>) {
            let _ = parse_signature_header(&header);
            let _ = verify_signature(&payload, &header, &secret);
        }
    }
}
