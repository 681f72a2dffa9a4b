use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// How long the simulated responder "thinks" before replying.
pub const SIMULATED_DELAY: Duration = Duration::from_millis(1000);

pub const SIMULATED_REPLY: &str = "This is a simulated AI response.";
pub const SIMULATED_NOTICE: &str = "Using simulated responses (offline model not downloaded).";
pub const READY_NOTICE: &str = "Offline model downloaded and ready.";
pub const ACQUISITION_FAILED_NOTICE: &str =
    "Failed to initialize offline model. Using simulated responses.";
pub const CANCELLED_NOTICE: &str = "Generation cancelled.";
pub const CHAT_UNAVAILABLE_NOTICE: &str = "Chat API not available in this engine build.";
pub const ERROR_PREFIX: &str = "Error: ";

/// Content of a model message that has started streaming but has no text yet.
pub const STREAM_PLACEHOLDER: &str = " ";

pub const STATUS_REQUESTING: &str = "Requesting model...";
pub const STATUS_LOADING: &str = "Loading model...";
pub const STATUS_READY: &str = "Model ready";
