//! One streamed model reply.

use crate::config::ControllerConfig;
use crate::conversation::{Message, Role};
use futures::stream::BoxStream;
use futures::StreamExt;
use localchat_engine::{ChatMessage, ChatRequest, ChatRole, EngineError, EngineHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("chat completion capability missing")]
    CapabilityMissing,
    #[error("{0}")]
    Failed(String),
    #[error("generation cancelled")]
    Cancelled,
}

impl From<EngineError> for GenerationError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::CompletionFailed(msg) => GenerationError::Failed(msg),
            other => GenerationError::Failed(other.to_string()),
        }
    }
}

pub type GenerationStream = BoxStream<'static, Result<String, GenerationError>>;

/// System instruction, then every prior turn, then the new user text.
///
/// History is passed through untruncated.
pub fn compose_prompt(system: &str, history: &[Message], new_user: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(ChatRole::System, system));
    messages.extend(history.iter().map(|m| {
        let role = match m.role {
            Role::User => ChatRole::User,
            Role::Model => ChatRole::Assistant,
        };
        ChatMessage::new(role, m.content.clone())
    }));
    messages.push(ChatMessage::new(ChatRole::User, new_user));
    messages
}

enum Step {
    Cancelled,
    Next(Option<Result<String, EngineError>>),
}

/// Stream fragments of the engine's reply.
///
/// The sequence ends after the last fragment, after the first error, or with
/// a final `Err(Cancelled)` once `cancel` is observed. Fragments that arrive
/// after cancellation are dropped.
pub fn generate(
    engine: EngineHandle,
    messages: Vec<ChatMessage>,
    config: &ControllerConfig,
    cancel: CancellationToken,
) -> GenerationStream {
    let request = ChatRequest {
        messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let stream = async_stream::stream! {
        let Some(chat) = engine.chat() else {
            yield Err(GenerationError::CapabilityMissing);
            return;
        };

        let mut deltas = match chat.create_chat_completion(request, cancel.clone()).await {
            Ok(deltas) => deltas,
            Err(e) => {
                yield Err(GenerationError::from(e));
                return;
            }
        };

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = deltas.next() => Step::Next(next),
            };

            match step {
                Step::Cancelled => {
                    yield Err(GenerationError::Cancelled);
                    return;
                }
                Step::Next(Some(Ok(fragment))) => {
                    if cancel.is_cancelled() {
                        yield Err(GenerationError::Cancelled);
                        return;
                    }
                    if !fragment.is_empty() {
                        yield Ok(fragment);
                    }
                }
                Step::Next(Some(Err(e))) => {
                    yield Err(GenerationError::from(e));
                    return;
                }
                Step::Next(None) => {
                    if cancel.is_cancelled() {
                        yield Err(GenerationError::Cancelled);
                    }
                    return;
                }
            }
        }
    };

    stream.boxed()
}
