//! The client runtime context
//!
//! [`DefiantClient`] is the explicit context object owning the event bus,
//! API client, reconciler, and state store. Collaborators receive a
//! reference to it; there are no process-wide singletons or ambient
//! registries.
//!
//! The runtime wires the data flow together: API results and verified
//! webhook payloads are normalized into events, reconciled into canonical
//! state, and fanned out on the bus. Presentation layers only call the
//! operations here, subscribe to the bus, and read state snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::analytics::{self, PaymentAnalytics};
use crate::api::{
    ApiClient, ApiConfig, CreateCustomerRequest, CreatePaymentRequest, ListPaymentsQuery,
    RefundPaymentRequest, UpdateCustomerRequest,
};
use crate::bus::{EventBus, SubscriptionId};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::{
    Customer, Event, EventSource, EventType, Payment, PaymentList, PersistedState,
};
use crate::reconcile::{ApplyOutcome, IgnoreReason, Reconciler};
use crate::store::StateStore;
use crate::stream::{derive_ws_url, StreamConsumer, StreamHandle};
use crate::webhook::{SignatureVerifier, WebhookEnvelope};
use crate::wire::{self, DecodeError};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote API settings.
    pub api: ApiConfig,
    /// Shared secret for webhook signature verification.
    pub webhook_secret: String,
    /// Replay tolerance for webhook timestamps.
    pub webhook_tolerance: Duration,
}

impl ClientConfig {
    /// Config with default retry and tolerance settings.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            api: ApiConfig::new(base_url, api_key),
            webhook_secret: webhook_secret.into(),
            webhook_tolerance: crate::webhook::signature::DEFAULT_TOLERANCE,
        }
    }
}

/// Result of processing a webhook delivery whose signature verified.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// The event mutated canonical state.
    Applied {
        /// Source-assigned event id.
        event_id: String,
        /// Normalized event type.
        event_type: EventType,
    },
    /// The event was a deliberate reconciliation no-op.
    Ignored {
        /// Source-assigned event id.
        event_id: String,
        /// Normalized event type.
        event_type: EventType,
        /// Why it was ignored.
        reason: IgnoreReason,
    },
    /// Well-formed payload of a type we do not handle; dropped.
    Unrecognized {
        /// The wire type string.
        event_type: String,
    },
    /// Authenticated but undecodable payload; reported as a diagnostic.
    Undecodable {
        /// Decode failure description.
        reason: String,
    },
}

/// The payment runtime. One instance per API key/session.
pub struct DefiantClient {
    config: ClientConfig,
    bus: Arc<EventBus>,
    api: ApiClient,
    reconciler: Arc<Reconciler>,
    verifier: SignatureVerifier,
    cancel: CancelToken,
    stream: parking_lot::Mutex<Option<StreamHandle>>,
}

impl DefiantClient {
    /// Build a runtime on top of `store`, restoring persisted state.
    pub fn new(config: ClientConfig, store: Arc<dyn StateStore>) -> Self {
        let bus = Arc::new(EventBus::new());
        let reconciler = Arc::new(Reconciler::new(store, bus.clone()));
        let cancel = CancelToken::new();
        let api = ApiClient::with_cancel_token(config.api.clone(), cancel.clone());
        let verifier =
            SignatureVerifier::with_tolerance(config.webhook_secret.clone(), config.webhook_tolerance);

        Self {
            config,
            bus,
            api,
            reconciler,
            verifier,
            cancel,
            stream: parking_lot::Mutex::new(None),
        }
    }

    /// Mark first-run initialization complete and persist it.
    pub fn initialize(&self) -> Result<()> {
        self.reconciler.mark_initialized()
    }

    /// The shared event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribe a listener for `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(event_type, listener)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id)
    }

    /// Immutable point-in-time copy of canonical state. Readers never
    /// observe a torn update mid-reconciliation.
    pub fn snapshot(&self) -> PersistedState {
        self.reconciler.snapshot()
    }

    /// Operator reset: drop all local state and persist the empty blob.
    pub fn clear_state(&self) -> Result<()> {
        self.reconciler.clear()
    }

    // ---- Payments ----

    /// Create a payment. The result is reconciled and published before this
    /// returns, so callers observe local state at least as new as the
    /// response they receive.
    pub async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<Payment> {
        let payment = self.api.create_payment(request).await?;
        self.ingest_local_payment(EventType::PaymentCreated, payment.clone());
        Ok(payment)
    }

    /// Fetch a payment by id. Read-only; local state is not touched.
    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment> {
        self.api.get_payment(payment_id).await
    }

    /// List payments with cursor pagination.
    pub async fn list_payments(&self, query: &ListPaymentsQuery) -> Result<PaymentList> {
        self.api.list_payments(query).await
    }

    /// Refund a payment, fully or partially.
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        request: &RefundPaymentRequest,
    ) -> Result<Payment> {
        let payment = self.api.refund_payment(payment_id, request).await?;
        self.ingest_local_payment(EventType::PaymentRefunded, payment.clone());
        Ok(payment)
    }

    /// Capture a previously authorized payment.
    pub async fn capture_payment(&self, payment_id: &str) -> Result<Payment> {
        let payment = self.api.capture_payment(payment_id).await?;
        self.ingest_local_payment(EventType::PaymentUpdated, payment.clone());
        Ok(payment)
    }

    // ---- Customers ----

    /// Create a customer.
    pub async fn create_customer(&self, request: &CreateCustomerRequest) -> Result<Customer> {
        let customer = self.api.create_customer(request).await?;
        self.ingest_local_customer(EventType::CustomerCreated, customer.clone());
        Ok(customer)
    }

    /// Fetch a customer by id.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Customer> {
        self.api.get_customer(customer_id).await
    }

    /// Update a customer.
    pub async fn update_customer(
        &self,
        customer_id: &str,
        request: &UpdateCustomerRequest,
    ) -> Result<Customer> {
        let customer = self.api.update_customer(customer_id, request).await?;
        self.ingest_local_customer(EventType::CustomerUpdated, customer.clone());
        Ok(customer)
    }

    /// Delete a customer remotely. The local record is kept; entity removal
    /// is a status transition on the remote side and local history stays
    /// auditable.
    pub async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        self.api.delete_customer(customer_id).await
    }

    // ---- Webhooks ----

    /// Verify a webhook signature without processing the payload.
    pub fn verify_webhook_signature(&self, envelope: &WebhookEnvelope) -> Result<()> {
        Ok(self.verifier.verify(envelope)?)
    }

    /// Verify, decode, and reconcile a webhook delivery.
    ///
    /// Signature failures surface as errors and the payload is never
    /// interpreted. After authentication, decode failures degrade to
    /// diagnostics and a [`WebhookOutcome::Undecodable`] result.
    pub fn process_webhook(&self, envelope: &WebhookEnvelope) -> Result<WebhookOutcome> {
        self.verifier.verify(envelope)?;

        match wire::decode_event(&envelope.raw_payload, EventSource::Webhook) {
            Ok(event) => {
                let outcome = self.reconciler.apply(&event);
                Ok(match outcome {
                    ApplyOutcome::Applied => WebhookOutcome::Applied {
                        event_id: event.id,
                        event_type: event.event_type,
                    },
                    ApplyOutcome::Ignored(reason) => WebhookOutcome::Ignored {
                        event_id: event.id,
                        event_type: event.event_type,
                        reason,
                    },
                })
            }
            Err(DecodeError::UnknownType(event_type)) => {
                tracing::debug!(%event_type, "Dropping unrecognized webhook event type");
                Ok(WebhookOutcome::Unrecognized { event_type })
            }
            Err(DecodeError::Unparseable(reason)) => {
                tracing::warn!(error = %reason, "Authenticated webhook payload failed to decode");
                self.bus.publish(&Event::diagnostic(
                    EventType::WebhookError,
                    reason.clone(),
                    EventSource::Webhook,
                ));
                Ok(WebhookOutcome::Undecodable { reason })
            }
        }
    }

    // ---- Streaming ----

    /// Start the live event feed. Returns `true` when a new subscription
    /// was established, `false` when one is already running.
    pub fn start_stream(&self) -> Result<bool> {
        let mut guard = self.stream.lock();
        if guard.is_some() {
            return Ok(false);
        }

        let ws_url = derive_ws_url(self.api.base_url())?;
        let reconciler = self.reconciler.clone();
        let handle = StreamConsumer::new(ws_url, self.config.api.api_key.clone())
            .start(move |event| {
                reconciler.apply(&event);
            });
        *guard = Some(handle);
        Ok(true)
    }

    /// Stop the live event feed. Idempotent; no event callbacks fire after
    /// this returns.
    pub async fn stop_stream(&self) {
        let handle = self.stream.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Tear the runtime down: cancel in-flight retry loops and stop the
    /// stream subscription.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.stop_stream().await;
    }

    // ---- Analytics ----

    /// Aggregate payments created in `[from, to]` denominated in `currency`.
    pub fn analytics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        currency: &str,
    ) -> PaymentAnalytics {
        analytics::aggregate(&self.snapshot(), from, to, currency)
    }

    // ---- Internal ----

    fn ingest_local_payment(&self, event_type: EventType, payment: Payment) {
        let event = Event::payment(local_event_id(), event_type, payment, EventSource::LocalApi);
        self.reconciler.apply(&event);
    }

    fn ingest_local_customer(&self, event_type: EventType, customer: Customer) {
        let event = Event::customer(local_event_id(), event_type, customer, EventSource::LocalApi);
        self.reconciler.apply(&event);
    }
}

/// Ids for locally minted events; unique so they never trip the dedup
/// window.
fn local_event_id() -> String {
    format!("local_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use crate::webhook::signature::sign_payload;

    const SECRET: &str = "whsec_runtime_test";

    fn client() -> DefiantClient {
        let config = ClientConfig::new("http://127.0.0.1:1", "dk_test_key", SECRET);
        DefiantClient::new(config, Arc::new(MemoryStateStore::new()))
    }

    fn signed(payload: &[u8]) -> WebhookEnvelope {
        let header = sign_payload(SECRET.as_bytes(), payload, Utc::now().timestamp());
        WebhookEnvelope::new(payload.to_vec(), header)
    }

    #[tokio::test]
    async fn webhook_applies_then_duplicates_are_ignored() {
        let client = client();
        let payload = br#"{"id":"evt_1","type":"payment.updated","data":{"id":"pay_1","version":2,"status":"succeeded","amount":500,"currency":"USD"}}"#;

        let first = client.process_webhook(&signed(payload)).unwrap();
        assert_eq!(
            first,
            WebhookOutcome::Applied {
                event_id: "evt_1".into(),
                event_type: EventType::PaymentUpdated,
            }
        );

        let second = client.process_webhook(&signed(payload)).unwrap();
        assert_eq!(
            second,
            WebhookOutcome::Ignored {
                event_id: "evt_1".into(),
                event_type: EventType::PaymentUpdated,
                reason: IgnoreReason::Duplicate,
            }
        );

        let snapshot = client.snapshot();
        assert_eq!(snapshot.payments["pay_1"].version, 2);
    }

    #[tokio::test]
    async fn tampered_webhook_never_reaches_state() {
        let client = client();
        let payload = br#"{"id":"evt_1","type":"payment.updated","data":{"id":"pay_1","version":2,"amount":500,"currency":"USD"}}"#;
        let mut envelope = signed(payload);

        // Flip one payload byte after signing.
        envelope.raw_payload[10] ^= 0x01;

        let result = client.process_webhook(&envelope);
        assert!(matches!(
            result,
            Err(crate::error::Error::Webhook(
                crate::error::WebhookError::InvalidSignature
            ))
        ));
        assert!(client.snapshot().payments.is_empty());
    }

    #[tokio::test]
    async fn unrecognized_webhook_type_is_dropped() {
        let client = client();
        let payload = br#"{"id":"evt_2","type":"subscription.created","data":{}}"#;
        let outcome = client.process_webhook(&signed(payload)).unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Unrecognized {
                event_type: "subscription.created".into()
            }
        );
    }

    #[tokio::test]
    async fn undecodable_webhook_becomes_diagnostic() {
        let client = client();
        let diagnostics = Arc::new(std::sync::Mutex::new(0u32));
        {
            let diagnostics = diagnostics.clone();
            client.subscribe(EventType::WebhookError, move |_| {
                *diagnostics.lock().unwrap() += 1;
                Ok(())
            });
        }

        let payload = br#"{"id":"evt_3","type":"payment.updated","data":{"nope":true}}"#;
        let outcome = client.process_webhook(&signed(payload)).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Undecodable { .. }));
        assert_eq!(*diagnostics.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn initialize_and_clear_round_trip() {
        let client = client();
        assert!(!client.snapshot().initialized);
        client.initialize().unwrap();
        assert!(client.snapshot().initialized);
        client.clear_state().unwrap();
        assert!(!client.snapshot().initialized);
    }

    #[tokio::test]
    async fn stop_stream_without_start_is_a_no_op() {
        let client = client();
        client.stop_stream().await;
        client.shutdown().await;
    }
}
