//! Lifecycle notifications
//!
//! Observers are registered on a dispatcher explicitly; there is no global
//! event bus.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use accel_common::{Backend, OperationKind};

/// Event emitted by the dispatcher or the benchmark harness
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccelerationEvent {
    /// Capabilities applied, dispatcher ready
    Initialized {
        backends: Vec<Backend>,
        simd: bool,
    },

    /// Dispatcher disposed
    Disposed,

    /// A compiled artifact was loaded into a backend
    ArtifactReady {
        model_id: String,
        artifact_id: Uuid,
        backend: Backend,
    },

    /// Work ran on the baseline path instead of a backend
    Fallback {
        kind: OperationKind,
        backend: Option<Backend>,
        reason: String,
    },

    /// Benchmark phase finished a step
    BenchmarkProgress {
        backend: Option<Backend>,
        category: String,
        completed: usize,
        total: usize,
    },
}

/// Receives dispatcher events
pub trait AccelerationObserver: Send + Sync {
    /// Called synchronously on the emitting task; must not block
    fn on_event(&self, event: &AccelerationEvent);
}

/// Forwards events into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<AccelerationEvent>,
}

impl ChannelObserver {
    /// Creates an observer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AccelerationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AccelerationObserver for ChannelObserver {
    fn on_event(&self, event: &AccelerationEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// Registered observers
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn AccelerationObserver>>>,
}

impl ObserverSet {
    /// Adds an observer
    pub fn subscribe(&self, observer: Arc<dyn AccelerationObserver>) {
        self.observers.write().push(observer);
    }

    /// Delivers an event to every observer
    pub fn notify(&self, event: AccelerationEvent) {
        for observer in self.observers.read().iter() {
            observer.on_event(&event);
        }
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns true without observers
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_observer_forwards_events() {
        let (observer, mut rx) = ChannelObserver::new();
        let set = ObserverSet::default();
        set.subscribe(Arc::new(observer));

        set.notify(AccelerationEvent::Disposed);
        assert_eq!(rx.recv().await, Some(AccelerationEvent::Disposed));
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_event(&AccelerationEvent::Disposed);
    }

    #[test]
    fn test_event_json_tag() {
        let json = serde_json::to_value(AccelerationEvent::Fallback {
            kind: OperationKind::MatMul,
            backend: None,
            reason: "below thresholds".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "fallback");
        assert_eq!(json["kind"], "mat_mul");
    }
}
