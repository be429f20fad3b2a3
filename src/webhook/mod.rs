//! Webhook ingestion
//!
//! Inbound webhook deliveries arrive as raw bytes plus a signature header.
//! Authentication runs first, over the exact raw bytes: untrusted payloads
//! are never decoded as structured data before [`SignatureVerifier::verify`]
//! succeeds.
//!
//! ```text
//! Delivery -> [Verify Signature] -> [Decode] -> [Normalize] -> Reconciler
//!                   |                   |
//!                   v                   v
//!         InvalidSignature /      diagnostic event
//!         Expired / Malformed     (never a crash)
//! ```

pub mod signature;

pub use signature::SignatureVerifier;

/// An inbound signed webhook delivery.
///
/// `raw_payload` is used verbatim for signature computation. The claimed
/// timestamp travels inside `signature_header` (`t=<unix>,v1=<hex>`), in the
/// scheme used by the major payment providers. Never mutated; consumed once
/// by the verifier.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    /// Exact payload bytes as delivered.
    pub raw_payload: Vec<u8>,
    /// Signature header as delivered.
    pub signature_header: String,
}

impl WebhookEnvelope {
    /// Build an envelope from the delivered parts.
    pub fn new(raw_payload: impl Into<Vec<u8>>, signature_header: impl Into<String>) -> Self {
        Self {
            raw_payload: raw_payload.into(),
            signature_header: signature_header.into(),
        }
    }

    /// The unix timestamp claimed by the signature header, if the header
    /// parses at all.
    pub fn claimed_timestamp(&self) -> Option<i64> {
        signature::parse_signature_header(&self.signature_header)
            .ok()
            .map(|parsed| parsed.timestamp)
    }
}
