use crate::sse::{parse_sse_line, SseEvent, SseLineDecoder};
use async_trait::async_trait;
use futures::StreamExt;
use localchat_engine::{
    ChatCompletions, ChatMessage, ChatRequest, DeltaStream, EngineError, InferenceEngine,
};
use serde::Serialize;
use std::sync::Mutex;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// OpenAI-compatible streaming request body.
#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// Engine backed by a running llama-server.
pub struct LocalServerEngine {
    model_id: String,
    base_url: String,
    http: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl LocalServerEngine {
    pub fn new(model_id: impl Into<String>, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            model_id: model_id.into(),
            base_url: base_url.into(),
            http,
            child: Mutex::new(None),
        }
    }

    /// Take ownership of a spawned server so it lives as long as the engine.
    pub fn with_process(self, child: Child) -> Self {
        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatCompletions for LocalServerEngine {
    async fn create_chat_completion(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, EngineError> {
        let body = CompletionBody {
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::CompletionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::CompletionFailed(format!("{}: {}", status, text)));
        }

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseLineDecoder::new();

            'read: loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'read,
                    next = bytes.next() => next,
                };
                let mut ended = false;
                let lines = match next {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        yield Err(EngineError::CompletionFailed(e.to_string()));
                        break 'read;
                    }
                    None => {
                        ended = true;
                        decoder.finish().into_iter().collect()
                    }
                };

                for line in lines {
                    if cancel.is_cancelled() {
                        break 'read;
                    }
                    match parse_sse_line(&line) {
                        Ok(SseEvent::Delta(text)) => {
                            yield Ok(text);
                        }
                        Ok(SseEvent::Done) => break 'read,
                        Ok(SseEvent::Skip) => {}
                        Err(e) => {
                            yield Err(EngineError::CompletionFailed(format!("malformed chunk: {}", e)));
                            break 'read;
                        }
                    }
                }
                if ended {
                    break 'read;
                }
            }
        };

        Ok(stream.boxed())
    }
}

impl InferenceEngine for LocalServerEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn chat(&self) -> Option<&dyn ChatCompletions> {
        Some(self)
    }

    fn dispose(&self) {
        if let Ok(mut slot) = self.child.lock() {
            if let Some(mut child) = slot.take() {
                tracing::info!("Stopping llama-server for discarded engine");
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localchat_engine::ChatRole;

    #[test]
    fn test_completion_body_is_openai_shaped() {
        let messages = vec![
            ChatMessage::new(ChatRole::System, "You are a helpful assistant."),
            ChatMessage::new(ChatRole::User, "hi"),
        ];
        let body = CompletionBody {
            messages: &messages,
            temperature: 0.5,
            max_tokens: 512,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[tokio::test]
    async fn test_engine_exposes_chat_and_disposes_without_process() {
        let engine = LocalServerEngine::new("m", "http://127.0.0.1:9", reqwest::Client::new());
        assert!(engine.chat().is_some());
        assert_eq!(engine.model_id(), "m");
        engine.dispose();
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_request() {
        let engine = LocalServerEngine::new("m", "http://127.0.0.1:9", reqwest::Client::new());
        let request = ChatRequest {
            messages: vec![ChatMessage::new(ChatRole::User, "hi")],
            temperature: 0.7,
            max_tokens: 16,
        };
        let result = engine
            .create_chat_completion(request, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(EngineError::CompletionFailed(_))));
    }
}
