//! Webhook signature verification
//!
//! HMAC-SHA256 over `"{timestamp}.{raw_payload}"` with a shared secret,
//! compared in constant time against the `v1` digest from the signature
//! header. A claimed timestamp outside the tolerance window is rejected to
//! mitigate replay.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;
use crate::webhook::WebhookEnvelope;

type HmacSha256 = Hmac<Sha256>;

/// Default replay tolerance window: five minutes either side of now.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Parsed fields of a signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Claimed unix timestamp (`t=` field).
    pub timestamp: i64,
    /// Hex-decoded `v1` digest.
    pub digest: Vec<u8>,
}

/// Parse a `t=<unix>,v1=<hex>` signature header.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, WebhookError> {
    let mut timestamp = None;
    let mut digest = None;

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or_else(|| WebhookError::Malformed(format!("bad header segment: {part:?}")))?;
        match key {
            "t" => {
                let parsed = value
                    .parse::<i64>()
                    .map_err(|_| WebhookError::Malformed(format!("bad timestamp: {value:?}")))?;
                timestamp = Some(parsed);
            }
            "v1" => {
                let decoded = hex::decode(value)
                    .map_err(|_| WebhookError::Malformed("digest is not valid hex".into()))?;
                digest = Some(decoded);
            }
            // Forward-compatible: later scheme versions ride alongside v1.
            _ => {}
        }
    }

    Ok(ParsedSignature {
        timestamp: timestamp.ok_or_else(|| WebhookError::Malformed("missing t= field".into()))?,
        digest: digest.ok_or_else(|| WebhookError::Malformed("missing v1= field".into()))?,
    })
}

/// Validates authenticity and freshness of inbound webhook payloads.
///
/// Stateless and side-effect free; a single instance is safely shared across
/// threads without synchronization.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the secret in logs.
        f.debug_struct("SignatureVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// Create a verifier with the default tolerance window.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self::with_tolerance(secret, DEFAULT_TOLERANCE)
    }

    /// Create a verifier with an explicit tolerance window.
    pub fn with_tolerance(secret: impl Into<Vec<u8>>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Verify an envelope.
    ///
    /// Returns `Ok(())` only when the header parses, the claimed timestamp is
    /// within the tolerance window, and the recomputed digest matches in
    /// constant time. The payload is treated as opaque bytes throughout.
    pub fn verify(&self, envelope: &WebhookEnvelope) -> Result<(), WebhookError> {
        // HMAC accepts an empty key; an empty secret never verifies.
        if self.secret.is_empty() {
            return Err(WebhookError::Malformed("signing secret is empty".into()));
        }

        let parsed = parse_signature_header(&envelope.signature_header)?;

        let now = Utc::now().timestamp();
        let skew = (now - parsed.timestamp).unsigned_abs();
        if skew > self.tolerance.as_secs() {
            tracing::warn!(
                claimed_timestamp = parsed.timestamp,
                skew_secs = skew,
                "Rejecting webhook outside tolerance window"
            );
            return Err(WebhookError::Expired);
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(&envelope.raw_payload);

        mac.verify_slice(&parsed.digest)
            .map_err(|_| WebhookError::InvalidSignature)
    }
}

/// Compute the signature header for a payload. Test and tooling helper; the
/// runtime only ever verifies.
pub fn sign_payload(secret: &[u8], payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
