mod engine;
pub mod mock;

pub use engine::{
    ChatCompletions, ChatMessage, ChatRequest, ChatRole, DeltaStream, EngineHandle,
    EngineProvider, InferenceEngine, InitProgressReport, ProgressFn,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    InitFailed(String),
    #[error("unsupported runtime: {0}")]
    Unsupported(String),
    #[error("chat completion failed: {0}")]
    CompletionFailed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
