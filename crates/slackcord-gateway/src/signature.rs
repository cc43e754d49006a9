//! Slack request signature verification
//!
//! Slack signs every Events API request with the v0 scheme:
//! `v0=hex(hmac_sha256(signing_secret, "v0:{timestamp}:{body}"))`.
//! Requests older than the allowed skew are rejected outright to blunt
//! replay attempts.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Maximum tolerated age of a signed request, in seconds.
const MAX_SKEW_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    /// Timestamp header missing or not a number
    BadTimestamp,
    /// Request timestamp outside the allowed skew
    Stale,
    /// Signature malformed or not matching the body
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadTimestamp => write!(f, "bad request timestamp"),
            Self::Stale => write!(f, "request timestamp outside allowed skew"),
            Self::Mismatch => write!(f, "signature mismatch"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Verify one request against the signing secret.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    if (now_unix - ts).abs() > MAX_SKEW_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = sign(signing_secret, timestamp, body);
    if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        debug!("Slack request signature verified");
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produce the v0 signature for a request body.
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    #[test]
    fn signed_request_verifies() {
        let body = br#"{"type":"event_callback"}"#;
        let signature = sign(SECRET, "1600000000", body);
        assert_eq!(
            verify_slack_signature(SECRET, "1600000000", body, &signature, 1600000010),
            Ok(())
        );
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign(SECRET, "1600000000", b"original");
        assert_eq!(
            verify_slack_signature(SECRET, "1600000000", b"tampered", &signature, 1600000010),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = b"payload";
        let signature = sign("other-secret", "1600000000", body);
        assert_eq!(
            verify_slack_signature(SECRET, "1600000000", body, &signature, 1600000010),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_request_is_rejected() {
        let body = b"payload";
        let signature = sign(SECRET, "1600000000", body);
        assert_eq!(
            verify_slack_signature(SECRET, "1600000000", body, &signature, 1600000000 + 301),
            Err(SignatureError::Stale)
        );
        // Future-dated requests are just as stale
        assert_eq!(
            verify_slack_signature(SECRET, "1600000000", body, &signature, 1600000000 - 301),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert_eq!(
            verify_slack_signature(SECRET, "yesterday", b"x", "v0=00", 0),
            Err(SignatureError::BadTimestamp)
        );
    }

    #[test]
    fn signature_has_v0_shape() {
        let signature = sign(SECRET, "1600000000", b"x");
        assert!(signature.starts_with("v0="));
        assert_eq!(signature.len(), 3 + 64);
    }
}
