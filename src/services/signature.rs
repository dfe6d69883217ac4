//! Webhook signature verification.
//!
//! The gateway signs each notification with HMAC-SHA256 over the manifest
//! `id:{data_id};request-id:{request_id};ts:{ts};` and sends the result in a
//! header of the form `ts=<timestamp>,v1=<hex digest>`.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Builds the signed manifest for a notification.
pub fn signature_manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{};request-id:{};ts:{};", data_id, request_id, ts)
}

fn keyed_mac(secret: &str, data_id: &str, request_id: &str, ts: &str) -> Result<HmacSha256, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(signature_manifest(data_id, request_id, ts).as_bytes());
    Ok(mac)
}

/// Hex-encoded HMAC-SHA256 of the manifest.
pub fn compute_signature(
    secret: &str,
    data_id: &str,
    request_id: &str,
    ts: &str,
) -> Result<String, InvalidLength> {
    let mac = keyed_mac(secret, data_id, request_id, ts)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

struct ParsedHeader<'a> {
    ts: &'a str,
    v1: &'a str,
}

fn parse_header(header: &str) -> Option<ParsedHeader<'_>> {
    let mut ts = None;
    let mut v1 = None;

    for part in header.split(',') {
        let (key, value) = part.split_once('=')?;
        match key.trim() {
            "ts" => ts = Some(value.trim()),
            "v1" => v1 = Some(value.trim()),
            _ => {}
        }
    }

    let ts = ts.filter(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))?;
    let v1 = v1.filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_hexdigit()))?;
    Some(ParsedHeader { ts, v1 })
}

/// Checks a webhook signature. An empty secret disables verification and
/// accepts everything; malformed headers are rejected, never an error.
pub fn verify(signature_header: &str, request_id: &str, data_id: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let Some(parsed) = parse_header(signature_header) else {
        return false;
    };
    let Ok(provided) = hex::decode(parsed.v1) else {
        return false;
    };

    let Ok(mac) = keyed_mac(secret, data_id, request_id, parsed.ts) else {
        return false;
    };
    // Constant-time comparison.
    mac.verify_slice(&provided).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Disabled,
    Enforced(String),
}

/// Verifier bound to the configured webhook secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    mode: Mode,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        match secret.filter(|s| !s.trim().is_empty()) {
            Some(secret) => Self {
                mode: Mode::Enforced(secret),
            },
            None => {
                tracing::warn!(
                    "WEBHOOK SIGNATURE VERIFICATION IS DISABLED: no webhook secret configured, every notification will be accepted"
                );
                Self { mode: Mode::Disabled }
            }
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self.mode, Mode::Enforced(_))
    }

    pub fn verify(&self, signature_header: &str, request_id: &str, data_id: &str) -> bool {
        match &self.mode {
            Mode::Disabled => {
                tracing::debug!(data_id, "Signature check bypassed (verification disabled)");
                true
            }
            Mode::Enforced(secret) => verify(signature_header, request_id, data_id, secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn header_for(data_id: &str, request_id: &str, ts: &str) -> String {
        format!("ts={},v1={}", ts, compute_signature(SECRET, data_id, request_id, ts).unwrap())
    }

    #[test]
    fn test_manifest_format() {
        assert_eq!(
            signature_manifest("123", "req-9", "1704908010"),
            "id:123;request-id:req-9;ts:1704908010;"
        );
    }

    #[test]
    fn test_valid_signature() {
        let header = header_for("123", "req-9", "1704908010");
        assert!(verify(&header, "req-9", "123", SECRET));
    }

    #[test]
    fn test_header_with_spaces_and_extra_keys() {
        let sig = compute_signature(SECRET, "123", "req-9", "1704908010").unwrap();
        let header = format!("ts=1704908010, v1={}, v0=legacy", sig);
        assert!(verify(&header, "req-9", "123", SECRET));
    }

    #[test]
    fn test_uppercase_digest_is_accepted() {
        let sig = compute_signature(SECRET, "123", "req-9", "1704908010").unwrap();
        let header = format!("ts=1704908010,v1={}", sig.to_uppercase());
        assert!(verify(&header, "req-9", "123", SECRET));
    }

    #[test]
    fn test_wrong_data_id_fails() {
        let header = header_for("123", "req-9", "1704908010");
        assert!(!verify(&header, "req-9", "124", SECRET));
    }

    #[test]
    fn test_malformed_headers_fail() {
        let sig = compute_signature(SECRET, "123", "req-9", "1").unwrap();
        for header in [
            String::new(),
            "garbage".to_string(),
            format!("v1={}", sig),
            "ts=1".to_string(),
            format!("ts=abc,v1={}", sig),
            "ts=1,v1=zz".to_string(),
        ] {
            assert!(!verify(&header, "req-9", "123", SECRET), "accepted {:?}", header);
        }
    }

    #[test]
    fn test_empty_secret_bypasses() {
        assert!(verify("", "", "", ""));
        assert!(verify("not even close", "req", "id", ""));
    }

    #[test]
    fn test_verifier_modes() {
        assert!(!SignatureVerifier::new(None).is_enforced());
        assert!(!SignatureVerifier::new(Some("  ".to_string())).is_enforced());

        let verifier = SignatureVerifier::new(Some(SECRET.to_string()));
        assert!(verifier.is_enforced());
        assert!(verifier.verify(&header_for("5", "r", "10"), "r", "5"));
        assert!(!verifier.verify("ts=10,v1=00", "r", "5"));
    }
}
