//! Shared event contracts for the chat controller.
//!
//! This crate defines the DTOs for telemetry the controller publishes while
//! it acquires the engine and streams replies. Using shared types keeps the
//! producers and consumers agreeing on field names.
//!
//! Also provides the `EventBus` trait for decoupled event emission.

mod bus;

pub use bus::{
    EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus, TracingEventBus,
};

use serde::{Deserialize, Serialize};

/// Event emitted while the model artifact is downloaded and initialized.
///
/// Producers: acquisition pipeline
/// Consumers: frontends rendering a progress line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionProgressEvent {
    /// Human readable status reported by the engine provider.
    pub status_text: String,
    /// Progress in percent, clamped to 0..=100.
    pub percent: u8,
}

/// Event emitted when acquisition fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionErrorEvent {
    pub model: String,
    pub error: String,
}

/// Event emitted on every lifecycle state transition of a chat session.
///
/// Producers: chat controller
/// Consumers: frontends, diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleStateEvent {
    /// State name in snake_case (e.g. "ready", "generating").
    pub state: String,
    /// Timestamp in milliseconds since epoch.
    #[serde(default)]
    pub ts_ms: i64,
}

/// Event emitted when a generation stream changes phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStatusEvent {
    /// One of "started", "completed", "cancelled", "failed", "simulated".
    pub phase: String,
    #[serde(default)]
    pub ts_ms: i64,
    /// Error text for failures, omitted otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LifecycleStateEvent {
    pub fn now(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl GenerationStatusEvent {
    pub fn now(phase: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            phase: phase.into(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
            detail,
        }
    }
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Acquisition progress update.
    pub const ACQUISITION_PROGRESS: &str = "engine:acquisition_progress";
    /// Engine published process-wide.
    pub const ACQUISITION_COMPLETE: &str = "engine:acquisition_complete";
    /// Acquisition failed.
    pub const ACQUISITION_ERROR: &str = "engine:acquisition_error";
    /// Chat session lifecycle transition.
    pub const LIFECYCLE_STATE: &str = "chat:lifecycle_state";
    /// Generation stream phase change.
    pub const GENERATION_STATUS: &str = "chat:generation_status";
}

/// Serialize an event DTO and emit it on the bus.
///
/// Serialization of these DTOs cannot fail; a failure would only drop the event.
pub fn emit_event<T: Serialize>(bus: &dyn EventBus, topic: &str, event: &T) {
    if let Ok(payload) = serde_json::to_value(event) {
        bus.emit(topic, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_roundtrip_fields() {
        let json = r#"{"status_text": "Fetching model artifact", "percent": 42}"#;
        let event: AcquisitionProgressEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.status_text, "Fetching model artifact");
        assert_eq!(event.percent, 42);
    }

    #[test]
    fn test_generation_status_omits_empty_detail() {
        let event = GenerationStatusEvent::now("completed", None);
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("detail").is_none());
        assert_eq!(value["phase"], "completed");
    }

    #[test]
    fn test_lifecycle_state_deserialize_minimal() {
        let json = r#"{"state": "ready"}"#;
        let event: LifecycleStateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.state, "ready");
        assert_eq!(event.ts_ms, 0);
    }

    #[test]
    fn test_emit_event_uses_topic() {
        let bus = InMemoryEventBus::new();
        emit_event(
            &bus,
            event_names::LIFECYCLE_STATE,
            &LifecycleStateEvent::now("declined"),
        );
        let events = bus.events_for(event_names::LIFECYCLE_STATE);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["state"], "declined");
    }
}
