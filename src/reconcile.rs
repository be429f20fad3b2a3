//! Event reconciliation
//!
//! The reconciler is the single owner of mutable canonical state. Every
//! mutation in the system funnels through [`Reconciler::apply`], which is
//! serialized by an internal mutex so the per-entity version invariant holds
//! under concurrent producers.
//!
//! Merge rules, in order:
//!
//! 1. **Dedup**: an event id inside the bounded dedup window is ignored.
//! 2. **Versioning**: update events apply only when their version is `>=`
//!    the stored version; anything older is ignored as stale.
//! 3. **Creation**: create-type events apply unconditionally when the entity
//!    is unknown; when it already exists they degrade to an update under
//!    rule 2.
//!
//! The outcome is deterministic over `(entity existence, stored version) x
//! (event type, event version)`. Source is metadata only; a stream frame, a
//! webhook, and a local API result describing the same change converge to
//! the same state in any arrival order.
//!
//! An applied event is written through to the state store and then published
//! on the bus so collaborators can react. A failed write degrades the
//! session to in-memory-only operation and surfaces a `storage.error`
//! diagnostic; it never fails the apply.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::EventBus;
use crate::error::Result;
use crate::model::{Event, EventPayload, EventType, PersistedState};
use crate::store::StateStore;

/// Result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event mutated canonical state.
    Applied,
    /// The event was a deliberate no-op.
    Ignored(IgnoreReason),
}

/// Why an event was not applied. These are audit signals, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event id was seen recently.
    Duplicate,
    /// The event describes an older version than the stored entity, or an
    /// unknown entity it cannot materialize.
    StaleVersion,
}

/// Applies incoming events to canonical local state.
pub struct Reconciler {
    state: Mutex<PersistedState>,
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
}

impl Reconciler {
    /// Create a reconciler, restoring state from `store`.
    pub fn new(store: Arc<dyn StateStore>, bus: Arc<EventBus>) -> Self {
        let state = store.load();
        tracing::info!(
            payments = state.payments.len(),
            customers = state.customers.len(),
            initialized = state.initialized,
            "Restored canonical state"
        );
        Self {
            state: Mutex::new(state),
            store,
            bus,
        }
    }

    /// Apply one event under the dedup and version rules.
    ///
    /// Diagnostic events carry no entity data; they are fanned out on the
    /// bus without touching state and report as applied.
    pub fn apply(&self, event: &Event) -> ApplyOutcome {
        if !event.event_type.is_entity_event() {
            self.bus.publish(event);
            return ApplyOutcome::Applied;
        }

        let outcome = {
            let mut state = self.state.lock();

            if state.last_seen_event_ids.contains(&event.id) {
                tracing::debug!(event_id = %event.id, "Duplicate event ignored");
                return ApplyOutcome::Ignored(IgnoreReason::Duplicate);
            }
            state.last_seen_event_ids.record(&event.id);

            let applied = match &event.payload {
                EventPayload::Payment(patch) => {
                    if let Some(existing) = state.payments.get_mut(&patch.id) {
                        if patch.version < existing.version {
                            tracing::debug!(
                                event_id = %event.id,
                                payment_id = %patch.id,
                                event_version = patch.version,
                                stored_version = existing.version,
                                "Stale payment event ignored"
                            );
                            false
                        } else {
                            patch.apply_to(existing);
                            true
                        }
                    } else if let Some(payment) = patch.materialize() {
                        state.payments.insert(payment.id.clone(), payment);
                        true
                    } else {
                        tracing::warn!(
                            event_id = %event.id,
                            payment_id = %patch.id,
                            "Event for unknown payment lacks fields to create it; ignored"
                        );
                        false
                    }
                }
                EventPayload::Customer(patch) => {
                    if let Some(existing) = state.customers.get_mut(&patch.id) {
                        if patch.version < existing.version {
                            tracing::debug!(
                                event_id = %event.id,
                                customer_id = %patch.id,
                                event_version = patch.version,
                                stored_version = existing.version,
                                "Stale customer event ignored"
                            );
                            false
                        } else {
                            patch.apply_to(existing);
                            true
                        }
                    } else if let Some(customer) = patch.materialize() {
                        state.customers.insert(customer.id.clone(), customer);
                        true
                    } else {
                        tracing::warn!(
                            event_id = %event.id,
                            customer_id = %patch.id,
                            "Event for unknown customer lacks fields to create it; ignored"
                        );
                        false
                    }
                }
                EventPayload::Diagnostic { .. } => false,
            };

            if !applied {
                return ApplyOutcome::Ignored(IgnoreReason::StaleVersion);
            }

            // Write-through while still holding the lock keeps persisted
            // blobs in apply order.
            if let Err(error) = self.store.save(&state) {
                tracing::warn!(
                    event_id = %event.id,
                    error = %error,
                    "State write-through failed; continuing in-memory"
                );
                Some(error.to_string())
            } else {
                None
            }
        };

        if let Some(message) = outcome {
            self.bus.publish(&Event::diagnostic(
                EventType::StorageError,
                message,
                event.source,
            ));
        }

        // Derived notification: collaborators react to applied events
        // without any knowledge of reconciliation internals.
        self.bus.publish(event);
        ApplyOutcome::Applied
    }

    /// Immutable point-in-time copy of canonical state.
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    /// Mark first-run initialization complete and persist it.
    pub fn mark_initialized(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.initialized = true;
        self.store.save(&state)
    }

    /// Operator reset: drop all state and persist the empty blob.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        *state = PersistedState::default();
        self.store.clear()
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Reconciler")
            .field("payments", &state.payments.len())
            .field("customers", &state.customers.len())
            .field("dedup_window", &state.last_seen_event_ids.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventSource, PaymentPatch, PaymentStatus};
    use crate::store::MemoryStateStore;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    fn reconciler() -> (Reconciler, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryStateStore::new());
        (Reconciler::new(store, bus.clone()), bus)
    }

    fn create_event(event_id: &str, payment_id: &str, version: u64) -> Event {
        Event::payment(
            event_id,
            EventType::PaymentCreated,
            PaymentPatch {
                id: payment_id.to_string(),
                version,
                status: Some(PaymentStatus::Created),
                amount: Some(500),
                currency: Some("USD".to_string()),
                payment_method: None,
                customer_id: None,
                description: None,
                metadata: None,
                refunded_amount: None,
                created_at: None,
            },
            EventSource::Stream,
        )
    }

    fn update_event(event_id: &str, payment_id: &str, version: u64, status: PaymentStatus) -> Event {
        Event::payment(
            event_id,
            EventType::PaymentUpdated,
            PaymentPatch {
                id: payment_id.to_string(),
                version,
                status: Some(status),
                amount: None,
                currency: None,
                payment_method: None,
                customer_id: None,
                description: None,
                metadata: None,
                refunded_amount: None,
                created_at: None,
            },
            EventSource::Webhook,
        )
    }

    #[test]
    fn applies_create_then_update() {
        let (rec, _bus) = reconciler();
        assert_eq!(rec.apply(&create_event("evt_1", "pay_1", 1)), ApplyOutcome::Applied);
        assert_eq!(
            rec.apply(&update_event("evt_2", "pay_1", 2, PaymentStatus::Succeeded)),
            ApplyOutcome::Applied
        );

        let snap = rec.snapshot();
        let pay = &snap.payments["pay_1"];
        assert_eq!(pay.version, 2);
        assert_eq!(pay.status, PaymentStatus::Succeeded);
        assert_eq!(pay.amount, 500);
    }

    #[test]
    fn duplicate_event_id_is_ignored() {
        let (rec, _bus) = reconciler();
        let event = create_event("evt_1", "pay_1", 1);
        assert_eq!(rec.apply(&event), ApplyOutcome::Applied);
        let before = rec.snapshot();

        assert_eq!(
            rec.apply(&event),
            ApplyOutcome::Ignored(IgnoreReason::Duplicate)
        );
        assert_eq!(rec.snapshot(), before);
    }

    #[test]
    fn stale_version_is_ignored() {
        let (rec, _bus) = reconciler();
        rec.apply(&update_event("evt_a", "pay_1", 2, PaymentStatus::Succeeded));
        // Unknown entity with full fields materializes on first sight.
        rec.apply(&create_event("evt_b", "pay_1", 2));

        assert_eq!(
            rec.apply(&update_event("evt_c", "pay_1", 1, PaymentStatus::Failed)),
            ApplyOutcome::Ignored(IgnoreReason::StaleVersion)
        );
        assert_eq!(rec.snapshot().payments["pay_1"].version, 2);
    }

    #[test]
    fn order_independence_converges_to_highest_version() {
        let run = |first: &Event, second: &Event| {
            let (rec, _bus) = reconciler();
            rec.apply(&create_event("evt_seed", "pay_1", 0));
            rec.apply(first);
            rec.apply(second);
            rec.snapshot().payments["pay_1"].clone()
        };

        let e1 = update_event("evt_1", "pay_1", 2, PaymentStatus::Succeeded);
        let e2 = update_event("evt_2", "pay_1", 1, PaymentStatus::Pending);

        let forward = run(&e1, &e2);
        let reverse = run(&e2, &e1);
        assert_eq!(forward.version, 2);
        assert_eq!(forward.status, PaymentStatus::Succeeded);
        assert_eq!(forward.version, reverse.version);
        assert_eq!(forward.status, reverse.status);
    }

    #[test]
    fn recreation_is_idempotent_under_version_rule() {
        let (rec, _bus) = reconciler();
        rec.apply(&create_event("evt_1", "pay_1", 1));
        rec.apply(&update_event("evt_2", "pay_1", 3, PaymentStatus::Succeeded));

        // A late re-create with an older version must not roll back state.
        assert_eq!(
            rec.apply(&create_event("evt_3", "pay_1", 1)),
            ApplyOutcome::Ignored(IgnoreReason::StaleVersion)
        );
        assert_eq!(rec.snapshot().payments["pay_1"].status, PaymentStatus::Succeeded);
    }

    #[test]
    fn update_for_unknown_entity_without_fields_is_ignored() {
        let (rec, _bus) = reconciler();
        assert_eq!(
            rec.apply(&update_event("evt_1", "pay_missing", 5, PaymentStatus::Failed)),
            ApplyOutcome::Ignored(IgnoreReason::StaleVersion)
        );
        assert!(rec.snapshot().payments.is_empty());
    }

    #[test]
    fn applied_events_are_published_exactly_once() {
        let (rec, bus) = reconciler();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        {
            let seen = seen.clone();
            bus.subscribe(EventType::PaymentCreated, move |event| {
                seen.lock().unwrap().push(event.id.clone());
                Ok(())
            });
        }

        let event = create_event("evt_1", "pay_1", 1);
        rec.apply(&event);
        rec.apply(&event); // duplicate, must not republish

        assert_eq!(*seen.lock().unwrap(), vec!["evt_1".to_string()]);
    }

    #[test]
    fn write_through_persists_across_restart() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryStateStore::new());
        {
            let rec = Reconciler::new(store.clone(), bus.clone());
            rec.apply(&create_event("evt_1", "pay_1", 1));
        }

        let rec = Reconciler::new(store, bus);
        let snap = rec.snapshot();
        assert_eq!(snap.payments["pay_1"].version, 1);
        // Dedup window survives too: the same delivery after restart no-ops.
        assert_eq!(
            rec.apply(&create_event("evt_1", "pay_1", 1)),
            ApplyOutcome::Ignored(IgnoreReason::Duplicate)
        );
    }

    #[test]
    fn storage_failure_degrades_to_in_memory_with_diagnostic() {
        struct FailingStore;
        impl StateStore for FailingStore {
            fn load(&self) -> PersistedState {
                PersistedState::default()
            }
            fn save(&self, _: &PersistedState) -> crate::error::Result<()> {
                Err(crate::error::Error::Storage("disk on fire".into()))
            }
            fn clear(&self) -> crate::error::Result<()> {
                Err(crate::error::Error::Storage("disk on fire".into()))
            }
        }

        let bus = Arc::new(EventBus::new());
        let diagnostics = Arc::new(StdMutex::new(0u32));
        {
            let diagnostics = diagnostics.clone();
            bus.subscribe(EventType::StorageError, move |_| {
                *diagnostics.lock().unwrap() += 1;
                Ok(())
            });
        }

        let rec = Reconciler::new(Arc::new(FailingStore), bus);
        assert_eq!(rec.apply(&create_event("evt_1", "pay_1", 1)), ApplyOutcome::Applied);
        assert_eq!(rec.snapshot().payments["pay_1"].version, 1);
        assert_eq!(*diagnostics.lock().unwrap(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let (rec, _bus) = reconciler();
        rec.apply(&create_event("evt_1", "pay_1", 1));
        rec.mark_initialized().unwrap();
        rec.clear().unwrap();

        let snap = rec.snapshot();
        assert!(snap.payments.is_empty());
        assert!(!snap.initialized);
    }
}
