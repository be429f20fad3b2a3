//! Defiant Client - Payment Platform Runtime
//!
//! This crate is the client-side runtime for the Defiant payment platform:
//! a typed API client with retries and idempotency keys, authenticated
//! webhook ingestion, a live event stream consumer, and a reconciler that
//! folds every source into one canonical, persisted state.
//!
//! # Features
//!
//! - **API Client**: Payments and customers over HTTPS, with bounded
//!   exponential backoff and per-mutation idempotency keys
//! - **Webhooks**: HMAC-SHA256 signature verification with replay
//!   protection, then decode and reconcile
//! - **Event Stream**: WebSocket consumer with automatic reconnect
//! - **Reconciliation**: Version-gated, deduplicated state convergence
//!   regardless of delivery order or channel
//!
//! # Architecture
//!
//! ```text
//! API Client ──┐
//! Webhooks ────┼──▶ Wire Decode ──▶ Reconciler ──▶ Event Bus ──▶ Listeners
//! Stream ──────┘                        │
//!                                       ▼
//!                                  State Store
//!                              (atomic file writes)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use defiant_client::{ClientConfig, DefiantClient};
//! use defiant_client::api::CreatePaymentRequest;
//! use defiant_client::model::EventType;
//! use defiant_client::store::FileStateStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("https://api.defiant.sh", "dk_live_key", "whsec_secret");
//!     let store = Arc::new(FileStateStore::new("./state"));
//!     let client = DefiantClient::new(config, store);
//!
//!     client.subscribe(EventType::PaymentCreated, |event| {
//!         println!("payment event: {}", event.id);
//!         Ok(())
//!     });
//!
//!     let payment = client
//!         .create_payment(&CreatePaymentRequest::new(2500, "USD"))
//!         .await?;
//!     println!("created {}", payment.id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod analytics;
pub mod api;
pub mod bus;
pub mod cancel;
pub mod crypto;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod stream;
pub mod webhook;
pub mod wire;

// Re-exports for convenience
pub use api::{ApiClient, ApiConfig};
pub use bus::EventBus;
pub use error::{Error, Result, WebhookError};
pub use model::{Customer, Event, EventType, Payment, PersistedState};
pub use runtime::{ClientConfig, DefiantClient, WebhookOutcome};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
pub use webhook::{SignatureVerifier, WebhookEnvelope};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
