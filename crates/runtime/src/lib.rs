//! Concrete engine provider: fetches a GGUF artifact and talks to a local
//! llama-server over its OpenAI-compatible HTTP API.

mod client;
mod provider;
mod server;
mod sse;

use localchat_engine::EngineError;
use localchat_models::ModelError;
use std::path::PathBuf;
use std::time::Duration;

pub use client::LocalServerEngine;
pub use provider::LocalServerProvider;
pub use server::LlamaServerProcess;
pub use sse::{parse_sse_line, SseEvent, SseLineDecoder};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("artifact download failed: {0}")]
    Download(#[from] ModelError),
    #[error("llama-server binary not found at {0}")]
    ServerBinaryNotFound(String),
    #[error("failed to start server: {0}")]
    ServerStartFailed(String),
    #[error("server process exited: {0}")]
    ServerDied(String),
    #[error("timeout waiting for server to become ready")]
    ServerStartTimeout,
    #[error("server not running at {0}")]
    ServerNotRunning(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

impl From<RuntimeError> for EngineError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::ServerBinaryNotFound(_) => EngineError::Unsupported(err.to_string()),
            other => EngineError::InitFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Where artifacts are stored, one subdirectory per model id.
    pub models_dir: PathBuf,
    /// Base URL of the OpenAI-compatible server.
    pub server_url: String,
    /// When set, the provider spawns this binary instead of expecting a
    /// server that is already running.
    pub server_bin: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub ctx_size: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            models_dir: localchat_models::models_dir(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            server_bin: None,
            startup_timeout: Duration::from_secs(120),
            ctx_size: 8192,
        }
    }
}
