//! Where session events go.
//!
//! Sessions publish through [`EventBus`] and never learn who listens: the CLI
//! logs them, tests capture them.

use std::sync::{Arc, Mutex};

pub trait EventBus: Send + Sync {
    /// `topic` is one of the names in [`crate::event_names`]. Must not block;
    /// callers emit from inside async tasks.
    fn emit(&self, topic: &str, payload: serde_json::Value);
}

pub type EventBusRef = Arc<dyn EventBus>;

#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Records every event, in emission order, for assertions.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<EmittedEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<EmittedEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<EmittedEvent> {
        self.guard().clone()
    }

    /// Events on one topic, oldest first.
    pub fn events_for(&self, topic: &str) -> Vec<EmittedEvent> {
        self.guard()
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        self.guard().push(EmittedEvent {
            topic: topic.to_string(),
            payload,
        });
    }
}

/// Logs each event at debug level. The CLI's only subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventBus;

impl EventBus for TracingEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        tracing::debug!(topic, %payload, "event");
    }
}

/// Drops everything.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _topic: &str, _payload: serde_json::Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_event_bus() {
        let bus = InMemoryEventBus::new();

        bus.emit("engine:acquisition_progress", json!({"percent": 10}));
        bus.emit("chat:lifecycle_state", json!({"state": "acquiring"}));
        bus.emit("engine:acquisition_progress", json!({"percent": 50}));

        assert_eq!(bus.len(), 3);
        let progress = bus.events_for("engine:acquisition_progress");
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[1].payload["percent"], 50);
        assert_eq!(bus.events_for("chat:lifecycle_state").len(), 1);
        assert_eq!(bus.events_for("test:missing").len(), 0);
    }

    #[test]
    fn test_in_memory_event_bus_clear() {
        let bus = InMemoryEventBus::new();

        bus.emit("test:event", json!({}));
        assert!(!bus.is_empty());

        bus.clear();
        assert!(bus.is_empty());
    }

    #[test]
    fn test_topics_interleave_in_emission_order() {
        let bus = InMemoryEventBus::new();
        for state in ["acquiring", "ready", "generating", "ready"] {
            bus.emit("chat:lifecycle_state", json!({ "state": state }));
            bus.emit("chat:generation_status", json!({ "phase": state }));
        }

        let all = bus.events();
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].topic, "chat:lifecycle_state");
        assert_eq!(all[1].topic, "chat:generation_status");

        let states: Vec<&str> = all
            .iter()
            .filter(|e| e.topic == "chat:lifecycle_state")
            .map(|e| e.payload["state"].as_str().unwrap())
            .collect();
        assert_eq!(states, ["acquiring", "ready", "generating", "ready"]);
    }

    #[test]
    fn test_null_and_tracing_buses_accept_events() {
        NullEventBus.emit("test:event", json!({"data": "ignored"}));
        TracingEventBus.emit("test:event", json!({"data": "logged"}));
    }
}
