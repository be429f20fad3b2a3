//! Wire event decoding
//!
//! Both remote sources (the push stream and authenticated webhooks) deliver
//! the same JSON frame shape:
//!
//! ```json
//! {"id": "evt_1", "type": "payment.updated", "data": {"id": "pay_1", "version": 2}}
//! ```
//!
//! This module turns such frames into normalized [`Event`] values. How a
//! decode failure is handled is the caller's business: the stream consumer
//! converts it into a diagnostic event, webhook processing surfaces it.

use serde::Deserialize;
use thiserror::Error;

use crate::model::{CustomerPatch, Event, EventPayload, EventSource, EventType, PaymentPatch};

/// Why a frame could not be normalized.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame is not valid JSON or lacks mandatory fields.
    #[error("unparseable event frame: {0}")]
    Unparseable(String),

    /// The frame is well-formed but its type is not one we handle.
    #[error("unrecognized event type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Value,
}

/// Decode a raw frame into a normalized event.
///
/// For webhook sources the caller must have verified the signature first;
/// this function is the first point where payload bytes are interpreted.
pub fn decode_event(raw: &[u8], source: EventSource) -> Result<Event, DecodeError> {
    let frame: WireFrame =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Unparseable(e.to_string()))?;

    let event_type: EventType = frame
        .event_type
        .parse()
        .map_err(|_| DecodeError::UnknownType(frame.event_type.clone()))?;
    if !event_type.is_entity_event() {
        // Diagnostic types are minted locally, never accepted off the wire.
        return Err(DecodeError::UnknownType(frame.event_type));
    }

    let payload = match event_type {
        EventType::PaymentCreated
        | EventType::PaymentUpdated
        | EventType::PaymentRefunded
        | EventType::InvoicePaid => {
            let patch: PaymentPatch = serde_json::from_value(frame.data)
                .map_err(|e| DecodeError::Unparseable(format!("payment data: {e}")))?;
            EventPayload::Payment(patch)
        }
        EventType::CustomerCreated | EventType::CustomerUpdated => {
            let patch: CustomerPatch = serde_json::from_value(frame.data)
                .map_err(|e| DecodeError::Unparseable(format!("customer data: {e}")))?;
            EventPayload::Customer(patch)
        }
        EventType::StreamError
        | EventType::WebhookError
        | EventType::ListenerError
        | EventType::StorageError => {
            unreachable!("diagnostic types rejected above")
        }
    };

    Ok(Event {
        id: frame.id,
        event_type,
        payload,
        source,
        received_at: chrono::Utc::now(),
    })
}
