//! Chat session orchestration over a local inference engine.
//!
//! `EngineHost` owns the process-wide engine and its one-shot acquisition;
//! `ChatController` drives a single conversation on top of it.

mod acquisition;
mod cancellation;
mod config;
mod constants;
mod controller;
mod conversation;
mod engine_host;
mod generation;
mod simulated;

pub use acquisition::{
    normalize_percent, AcquisitionError, AcquisitionPipeline, AcquisitionProgress, ProgressSink,
};
pub use cancellation::{CancellationSlot, SlotToken};
pub use config::ControllerConfig;
pub use constants::*;
pub use controller::{
    resolve_initial_state, ChatController, ConsentDecision, ConsentPrompt, ConversationSnapshot,
    FixedConsent, LifecycleState, TurnHandle, TurnOutcome,
};
pub use conversation::{Conversation, Message, MessageId, Role};
pub use engine_host::{EngineHost, EngineSlot};
pub use generation::{compose_prompt, generate, GenerationError, GenerationStream};
pub use simulated::SimulatedResponder;
