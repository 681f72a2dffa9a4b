//! Scripted engine and provider for tests and offline demos.

use crate::engine::{
    ChatCompletions, ChatRequest, DeltaStream, EngineHandle, EngineProvider, InferenceEngine,
    InitProgressReport, ProgressFn,
};
use crate::EngineError;
use async_trait::async_trait;
use localchat_models::ModelSpec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct MockEngine {
    model_id: String,
    fragments: Vec<String>,
    fragment_delay: Option<Duration>,
    fail_after: Option<(usize, String)>,
    chat_capable: bool,
    completions: AtomicUsize,
    disposed: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl MockEngine {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model_id: "mock-model".to_string(),
            fragments: fragments.into_iter().map(Into::into).collect(),
            fragment_delay: None,
            fail_after: None,
            chat_capable: true,
            completions: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Wait this long before each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Deliver `count` fragments, then end the stream with an error.
    pub fn failing_after(mut self, count: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((count, message.into()));
        self
    }

    /// Build an engine that exposes no chat-completion capability.
    pub fn without_chat(mut self) -> Self {
        self.chat_capable = false;
        self
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl ChatCompletions for MockEngine {
    async fn create_chat_completion(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> crate::Result<DeltaStream> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_request.lock() {
            *slot = Some(request);
        }

        let fragments = self.fragments.clone();
        let delay = self.fragment_delay;
        let fail_after = self.fail_after.clone();

        let stream = async_stream::stream! {
            let total = fragments.len();
            for (i, fragment) in fragments.into_iter().enumerate() {
                if let Some((n, message)) = &fail_after {
                    if i == *n {
                        yield Err(EngineError::CompletionFailed(message.clone()));
                        return;
                    }
                }
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                yield Ok(fragment);
            }
            if let Some((n, message)) = fail_after {
                if n >= total {
                    yield Err(EngineError::CompletionFailed(message));
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

impl InferenceEngine for MockEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn chat(&self) -> Option<&dyn ChatCompletions> {
        if self.chat_capable {
            Some(self)
        } else {
            None
        }
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider that replays scripted progress and hands out one shared engine.
pub struct MockProvider {
    engine: Arc<MockEngine>,
    reports: Vec<InitProgressReport>,
    report_delay: Option<Duration>,
    failure: Option<EngineError>,
    gate: Option<Arc<Notify>>,
    creates: AtomicUsize,
}

impl MockProvider {
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self {
            engine,
            reports: Vec::new(),
            report_delay: None,
            failure: None,
            gate: None,
            creates: AtomicUsize::new(0),
        }
    }

    pub fn with_reports(mut self, reports: Vec<InitProgressReport>) -> Self {
        self.reports = reports;
        self
    }

    /// Wait this long before each progress report.
    pub fn with_report_delay(mut self, delay: Duration) -> Self {
        self.report_delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(EngineError::InitFailed(message.into()));
        self
    }

    /// Hold `create` open after the last report until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn engine(&self) -> &Arc<MockEngine> {
        &self.engine
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(
        &self,
        model: &ModelSpec,
        on_progress: &ProgressFn<'_>,
    ) -> crate::Result<EngineHandle> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(model = %model.id, "Mock provider creating engine");

        for report in &self.reports {
            if let Some(delay) = self.report_delay {
                tokio::time::sleep(delay).await;
            }
            on_progress(report.clone());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let handle: EngineHandle = self.engine.clone();
        Ok(handle)
    }
}
