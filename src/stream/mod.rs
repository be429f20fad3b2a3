//! Live event stream
//!
//! [`StreamConsumer`] maintains one logical subscription to the platform's
//! server-pushed event channel over WebSocket. Connection loss triggers
//! reconnection with exponential backoff and jitter until the handle is
//! stopped; a dropped frame never terminates the subscription.

mod consumer;

pub use consumer::{derive_ws_url, StreamConsumer, StreamHandle};
