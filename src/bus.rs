//! In-process event fan-out
//!
//! Decouples producers (webhook processing, the stream consumer, local API
//! results) from consumers (presentation layers, audit logging). Delivery is
//! at-most-once per registered listener per publish, in registration order
//! within an event type. The bus performs no deduplication; that is the
//! reconciler's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{Event, EventType};

/// A registered event listener.
///
/// Errors are isolated: a failing listener never prevents delivery to
/// listeners registered after it.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    listener: Listener,
}

/// Publish/subscribe fan-out over [`EventType`]s.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventType, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events of `event_type`.
    ///
    /// Listeners for the same type are invoked in registration order. No
    /// ordering is guaranteed across different types.
    pub fn subscribe<F>(&self, event_type: EventType, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscription {
                id,
                listener: Arc::new(listener),
            });
        id
    }

    /// Remove a subscription. Removing an already-removed id is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        for listeners in subs.values_mut() {
            listeners.retain(|s| s.id != id);
        }
    }

    /// Deliver `event` to every listener registered for its type.
    ///
    /// Never blocks on listener execution beyond the listeners' own direct
    /// run time: listeners are plain synchronous closures. A listener error
    /// is caught, reported as a `listener.error` diagnostic, and delivery
    /// continues with the next listener.
    pub fn publish(&self, event: &Event) {
        // Snapshot the listener set so callbacks may subscribe/unsubscribe
        // without deadlocking against this dispatch.
        let listeners: Vec<(SubscriptionId, Listener)> = {
            let subs = self.subscriptions.read();
            subs.get(&event.event_type)
                .map(|v| v.iter().map(|s| (s.id, s.listener.clone())).collect())
                .unwrap_or_default()
        };

        for (id, listener) in listeners {
            if let Err(error) = listener(event) {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    subscription = ?id,
                    error = %error,
                    "Listener failed; continuing delivery"
                );
                // A failing listener.error listener only gets logged, so the
                // diagnostic chain terminates after one hop.
                if event.event_type != EventType::ListenerError {
                    let diagnostic = Event::diagnostic(
                        EventType::ListenerError,
                        format!("listener {id:?} failed on {}: {error}", event.event_type),
                        event.source,
                    );
                    self.publish(&diagnostic);
                }
            }
        }
    }

    /// Number of live subscriptions across all types.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventSource;
    use std::sync::Mutex;

    fn diag(event_type: EventType) -> Event {
        Event::diagnostic(event_type, "test", EventSource::LocalApi)
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(EventType::StreamError, move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }

        bus.publish(&diag(EventType::StreamError));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn listener_error_does_not_stop_delivery() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe(EventType::StreamError, |_| anyhow::bail!("boom"));
        {
            let reached = reached.clone();
            bus.subscribe(EventType::StreamError, move |_| {
                *reached.lock().unwrap() = true;
                Ok(())
            });
        }

        bus.publish(&diag(EventType::StreamError));
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn listener_error_is_reported_as_diagnostic() {
        let bus = EventBus::new();
        let diagnostics = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(EventType::StreamError, |_| anyhow::bail!("boom"));
        {
            let diagnostics = diagnostics.clone();
            bus.subscribe(EventType::ListenerError, move |event| {
                diagnostics.lock().unwrap().push(event.clone());
                Ok(())
            });
        }

        bus.publish(&diag(EventType::StreamError));
        assert_eq!(diagnostics.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_listener_error_listener_terminates_chain() {
        let bus = EventBus::new();
        bus.subscribe(EventType::StreamError, |_| anyhow::bail!("boom"));
        bus.subscribe(EventType::ListenerError, |_| anyhow::bail!("also boom"));

        // Must not recurse forever.
        bus.publish(&diag(EventType::StreamError));
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0u32));

        let id = {
            let calls = calls.clone();
            bus.subscribe(EventType::StreamError, move |_| {
                *calls.lock().unwrap() += 1;
                Ok(())
            })
        };

        bus.publish(&diag(EventType::StreamError));
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        bus.publish(&diag(EventType::StreamError));

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn listener_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        let bus_inner = bus.clone();

        bus.subscribe(EventType::StreamError, move |_| {
            bus_inner.subscribe(EventType::StorageError, |_| Ok(()));
            Ok(())
        });

        bus.publish(&diag(EventType::StreamError));
        assert_eq!(bus.subscription_count(), 2);
    }

    #[test]
    fn delivery_is_per_type() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0u32));
        {
            let calls = calls.clone();
            bus.subscribe(EventType::StorageError, move |_| {
                *calls.lock().unwrap() += 1;
                Ok(())
            });
        }

        bus.publish(&diag(EventType::StreamError));
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
