use async_trait::async_trait;
use futures::stream::BoxStream;
use localchat_models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A streaming chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Incremental text fragments, in delivery order.
pub type DeltaStream = BoxStream<'static, crate::Result<String>>;

/// Report emitted by a provider while it prepares an engine.
///
/// `progress` is the backend's own fraction, usually in `[0, 1]` but not
/// guaranteed to be.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitProgressReport {
    pub text: Option<String>,
    pub progress: Option<f64>,
}

impl InitProgressReport {
    pub fn new(text: impl Into<String>, progress: f64) -> Self {
        Self {
            text: Some(text.into()),
            progress: Some(progress),
        }
    }
}

/// Progress callback handed to [`EngineProvider::create`]. Borrowed for the
/// duration of the call only.
pub type ProgressFn<'a> = dyn Fn(InitProgressReport) + Send + Sync + 'a;

#[async_trait]
pub trait ChatCompletions: Send + Sync {
    /// Start a streamed completion.
    ///
    /// Implementations stop producing fragments once `cancel` fires; the
    /// stream then simply ends.
    async fn create_chat_completion(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> crate::Result<DeltaStream>;
}

/// An instantiated runtime.
pub trait InferenceEngine: Send + Sync {
    fn model_id(&self) -> &str;

    /// The chat-completion capability, if this engine build has one.
    fn chat(&self) -> Option<&dyn ChatCompletions>;

    /// Release runtime resources. Called when a freshly created engine is
    /// discarded before anyone used it.
    fn dispose(&self) {}
}

/// Shared, process-lifetime reference to an engine.
pub type EngineHandle = Arc<dyn InferenceEngine>;

/// Factory for engines.
///
/// The application layer depends on this abstraction; concrete runtimes and
/// the scripted mock implement it.
#[async_trait]
pub trait EngineProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create(
        &self,
        model: &ModelSpec,
        on_progress: &ProgressFn<'_>,
    ) -> crate::Result<EngineHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::new(ChatRole::Assistant, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn test_progress_report_constructor() {
        let report = InitProgressReport::new("Loading", 0.25);
        assert_eq!(report.text.as_deref(), Some("Loading"));
        assert_eq!(report.progress, Some(0.25));
        assert_eq!(InitProgressReport::default().text, None);
    }
}
