use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A point in a node's lifecycle at which an [`Event`] is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Initialized,
    Setup,
    Entering,
    Exiting,
    StatusChanged,
    Shutdown,
    Error,
}

/// A lifecycle event emitted by a node, fanned out to subscribed observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub node_id: Uuid,
    pub node_name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<Value>,
}

impl Event {
    pub fn new(kind: EventKind, node_id: Uuid, node_name: impl Into<String>) -> Self {
        Self {
            kind,
            node_id,
            node_name: node_name.into(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// An observer invoked for every emitted event, in registration order.
pub type EventObserver = Arc<dyn Fn(&Event) + Send + Sync>;

/// Fans events out to registered listeners.
///
/// Observers are invoked synchronously, in registration order (spec
/// §4.1/§5 ordering guarantee). A panicking observer is caught and logged;
/// it never aborts the tick that produced the event.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Vec<EventObserver>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: EventObserver) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: Event) {
        for observer in &self.observers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer(&event);
            }));
            if result.is_err() {
                warn!(
                    node = %event.node_name,
                    kind = ?event.kind,
                    "event observer panicked; continuing tick"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observer_count", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn observers_fire_in_registration_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(Arc::new(move |_e: &Event| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        bus.subscribe(Arc::new(move |_e: &Event| o2.lock().unwrap().push(2)));

        bus.emit(Event::new(EventKind::Setup, Uuid::new_v4(), "n"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_observer_does_not_stop_dispatch() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(|_e: &Event| panic!("boom")));
        let c = counter.clone();
        bus.subscribe(Arc::new(move |_e: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(Event::new(EventKind::Setup, Uuid::new_v4(), "n"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
