//! Chat session lifecycle.
//!
//! `ChatController` decides for every user turn whether the local engine,
//! a lazy engine initialization, or the simulated responder answers it. The
//! rendering side only ever sees [`ConversationSnapshot`]s; failures become
//! model messages, never errors.
//!
//! Operations are synchronous check-and-claim steps on the session state.
//! Anything slow (consent, acquisition, streaming, the simulated delay) runs
//! on a spawned task that re-checks the session is still alive before each
//! mutation.

use crate::acquisition::{AcquisitionError, AcquisitionProgress};
use crate::cancellation::{CancellationSlot, SlotToken};
use crate::config::ControllerConfig;
use crate::constants::{
    ACQUISITION_FAILED_NOTICE, CANCELLED_NOTICE, CHAT_UNAVAILABLE_NOTICE, ERROR_PREFIX,
    READY_NOTICE, SIMULATED_NOTICE, STREAM_PLACEHOLDER,
};
use crate::conversation::{Conversation, Message};
use crate::engine_host::EngineHost;
use crate::generation::{compose_prompt, generate, GenerationError};
use crate::simulated::SimulatedResponder;
use async_trait::async_trait;
use futures::StreamExt;
use localchat_engine::EngineHandle;
use localchat_events::{emit_event, event_names, GenerationStatusEvent, LifecycleStateEvent};
use localchat_models::ModelSpec;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing downloaded, nothing declined; consent has to be asked.
    Unconsented,
    Declined,
    /// The artifact is on this device but no engine exists in this process.
    ArtifactPresentNotLoaded,
    Acquiring,
    Ready,
    Generating,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unconsented => "unconsented",
            LifecycleState::Declined => "declined",
            LifecycleState::ArtifactPresentNotLoaded => "artifact_present_not_loaded",
            LifecycleState::Acquiring => "acquiring",
            LifecycleState::Ready => "ready",
            LifecycleState::Generating => "generating",
        }
    }
}

/// Everything a frontend needs to render the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub is_generating: bool,
    pub is_acquiring: bool,
    /// Present only while an acquisition is running.
    pub progress: Option<AcquisitionProgress>,
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Accept,
    Decline,
    /// The prompt could not be shown. Treated as a decline for this session
    /// only.
    Unavailable,
}

#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn ask(&self, model: &ModelSpec) -> ConsentDecision;
}

/// Prompt that always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedConsent(pub ConsentDecision);

#[async_trait]
impl ConsentPrompt for FixedConsent {
    async fn ask(&self, _model: &ModelSpec) -> ConsentDecision {
        self.0
    }
}

/// How a submitted turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Streamed,
    Simulated,
    Cancelled,
    Failed(String),
    /// The session was torn down before the turn finished.
    Abandoned,
}

pub type TurnHandle = JoinHandle<TurnOutcome>;

/// Initial state for a new session, from process and device state.
pub fn resolve_initial_state(host: &EngineHost) -> LifecycleState {
    if host.engine().is_some() {
        LifecycleState::Ready
    } else if host.registry().has_downloaded_artifact() {
        LifecycleState::ArtifactPresentNotLoaded
    } else if host.registry().has_declined_before() {
        LifecycleState::Declined
    } else {
        LifecycleState::Unconsented
    }
}

enum Route {
    Stream(EngineHandle, SlotToken),
    Lazy,
    Simulate,
}

struct Inner {
    state: LifecycleState,
    conversation: Conversation,
    /// A simulated reply is pending. Input is refused meanwhile.
    simulating: bool,
    progress: Option<AcquisitionProgress>,
    torn_down: bool,
}

impl Inner {
    fn busy(&self) -> bool {
        self.simulating
            || matches!(
                self.state,
                LifecycleState::Acquiring | LifecycleState::Generating
            )
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.conversation.messages().to_vec(),
            is_generating: self.simulating || self.state == LifecycleState::Generating,
            is_acquiring: self.state == LifecycleState::Acquiring,
            progress: self.progress.clone(),
            state: self.state,
        }
    }
}

struct Session {
    host: Arc<EngineHost>,
    consent: Arc<dyn ConsentPrompt>,
    config: ControllerConfig,
    simulated: SimulatedResponder,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<ConversationSnapshot>,
    generation: CancellationSlot,
    teardown: CancellationToken,
}

impl Session {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("controller state poisoned")
    }

    fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Apply `f` and publish the result, unless the session is torn down.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.lock();
        if inner.torn_down {
            return None;
        }
        let before = inner.state;
        let out = f(&mut inner);
        let after = inner.state;
        self.snapshot.send_replace(inner.snapshot());
        drop(inner);

        self.announce(before, after);
        Some(out)
    }

    fn announce(&self, from: LifecycleState, to: LifecycleState) {
        if from == to {
            return;
        }
        tracing::debug!(from = from.as_str(), to = to.as_str(), "Lifecycle transition");
        emit_event(
            self.host.events().as_ref(),
            event_names::LIFECYCLE_STATE,
            &LifecycleStateEvent::now(to.as_str()),
        );
    }

    /// After a lazy acquisition: publish `Ready`, then claim the session for
    /// the pending turn. Both happen under one lock so no other turn can slip
    /// in between.
    fn ready_then_generating(&self) -> Option<SlotToken> {
        let mut inner = self.lock();
        if inner.torn_down {
            return None;
        }
        let before = inner.state;
        inner.state = LifecycleState::Ready;
        inner.progress = None;
        self.snapshot.send_replace(inner.snapshot());

        inner.state = LifecycleState::Generating;
        let token = self.generation.begin_token();
        self.snapshot.send_replace(inner.snapshot());
        drop(inner);

        self.announce(before, LifecycleState::Ready);
        self.announce(LifecycleState::Ready, LifecycleState::Generating);
        Some(token)
    }

    fn emit_generation(&self, phase: &str, detail: Option<String>) {
        emit_event(
            self.host.events().as_ref(),
            event_names::GENERATION_STATUS,
            &GenerationStatusEvent::now(phase, detail),
        );
    }

    /// Move to `Acquiring` if the current state is one of `from` and no
    /// acquisition or stream is running. A pending simulated reply blocks the
    /// move unless `over_simulated` is set. Returns the state left behind.
    fn begin_acquisition(
        &self,
        from: &[LifecycleState],
        over_simulated: bool,
    ) -> Option<LifecycleState> {
        self.update(|inner| {
            let blocked = if over_simulated {
                matches!(
                    inner.state,
                    LifecycleState::Acquiring | LifecycleState::Generating
                )
            } else {
                inner.busy()
            };
            if blocked || !from.contains(&inner.state) {
                return None;
            }
            let previous = inner.state;
            inner.state = LifecycleState::Acquiring;
            inner.progress = Some(AcquisitionProgress::requesting());
            Some(previous)
        })
        .flatten()
    }

    async fn acquire_engine(&self) -> Result<EngineHandle, AcquisitionError> {
        let sink = |progress: AcquisitionProgress| {
            self.update(|inner| inner.progress = Some(progress));
        };
        self.host.pipeline().acquire(&sink, &self.teardown).await
    }

    async fn run_consent(self: Arc<Self>) {
        let decision = tokio::select! {
            _ = self.teardown.cancelled() => return,
            decision = self.consent.ask(self.host.model()) => decision,
        };
        tracing::info!(?decision, "Consent decision");

        match decision {
            ConsentDecision::Accept => {
                // A simulated turn sent while the prompt was open must not
                // swallow the answer.
                if let Some(previous) = self.begin_acquisition(&[LifecycleState::Unconsented], true)
                {
                    self.run_explicit_acquisition(previous).await;
                }
            }
            ConsentDecision::Decline => {
                self.update(|inner| {
                    if inner.state == LifecycleState::Unconsented {
                        self.host.registry().mark_declined();
                        inner.state = LifecycleState::Declined;
                        inner.conversation.push_model(SIMULATED_NOTICE);
                    }
                });
            }
            ConsentDecision::Unavailable => {
                self.update(|inner| {
                    if inner.state == LifecycleState::Unconsented {
                        inner.state = LifecycleState::Declined;
                    }
                });
            }
        }
    }

    /// Acquisition the user asked for (consent or the download action).
    async fn run_explicit_acquisition(&self, previous: LifecycleState) {
        match self.acquire_engine().await {
            Ok(_) => {
                self.update(|inner| {
                    inner.state = LifecycleState::Ready;
                    inner.progress = None;
                    inner.conversation.push_model(READY_NOTICE);
                });
            }
            Err(AcquisitionError::Failed(e)) => {
                tracing::warn!("Falling back to simulated responses: {}", e);
                self.update(|inner| {
                    self.host.registry().mark_declined();
                    inner.state = LifecycleState::Declined;
                    inner.progress = None;
                    inner.conversation.push_model(ACQUISITION_FAILED_NOTICE);
                });
            }
            Err(AcquisitionError::Abandoned) => {
                self.update(|inner| {
                    inner.state = previous;
                    inner.progress = None;
                });
            }
        }
    }

    async fn run_turn(
        self: Arc<Self>,
        route: Route,
        history: Vec<Message>,
        text: String,
    ) -> TurnOutcome {
        match route {
            Route::Stream(engine, token) => self.stream_reply(engine, token, history, text).await,
            Route::Simulate => self.simulate_reply().await,
            Route::Lazy => match self.acquire_engine().await {
                Ok(engine) => {
                    match self.ready_then_generating() {
                        Some(token) => self.stream_reply(engine, token, history, text).await,
                        None => TurnOutcome::Abandoned,
                    }
                }
                Err(AcquisitionError::Failed(e)) => {
                    tracing::warn!("Lazy engine initialization failed, simulating this turn: {}", e);
                    let resumed = self.update(|inner| {
                        inner.state = LifecycleState::ArtifactPresentNotLoaded;
                        inner.progress = None;
                        inner.simulating = true;
                    });
                    match resumed {
                        Some(()) => self.simulate_reply().await,
                        None => TurnOutcome::Abandoned,
                    }
                }
                Err(AcquisitionError::Abandoned) => {
                    self.update(|inner| {
                        inner.state = LifecycleState::ArtifactPresentNotLoaded;
                        inner.progress = None;
                    });
                    TurnOutcome::Abandoned
                }
            },
        }
    }

    async fn simulate_reply(&self) -> TurnOutcome {
        self.emit_generation("simulated", None);
        let Some(reply) = self.simulated.respond(&self.teardown).await else {
            return TurnOutcome::Abandoned;
        };
        let applied = self.update(|inner| {
            inner.conversation.push_model(reply);
            inner.simulating = false;
        });
        match applied {
            Some(()) => TurnOutcome::Simulated,
            None => TurnOutcome::Abandoned,
        }
    }

    async fn stream_reply(
        &self,
        engine: EngineHandle,
        token: SlotToken,
        history: Vec<Message>,
        text: String,
    ) -> TurnOutcome {
        if engine.chat().is_none() {
            self.generation.finish(&token);
            self.emit_generation("failed", Some(CHAT_UNAVAILABLE_NOTICE.to_string()));
            return self
                .update(|inner| {
                    inner.conversation.push_model(CHAT_UNAVAILABLE_NOTICE);
                    inner.state = LifecycleState::Ready;
                })
                .map(|_| TurnOutcome::Failed(CHAT_UNAVAILABLE_NOTICE.to_string()))
                .unwrap_or(TurnOutcome::Abandoned);
        }

        let messages = compose_prompt(&self.config.system_prompt, &history, &text);
        let Some(message_id) = self.update(|inner| inner.conversation.push_model(STREAM_PLACEHOLDER))
        else {
            self.generation.finish(&token);
            return TurnOutcome::Abandoned;
        };
        self.emit_generation("started", None);

        let mut stream = generate(engine, messages, &self.config, token.token());
        let mut accumulated = String::new();
        let mut ending = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    accumulated.push_str(&fragment);
                    let published = self.update(|inner| {
                        inner.conversation.replace(message_id, accumulated.as_str());
                    });
                    if published.is_none() {
                        break;
                    }
                }
                Err(e) => {
                    ending = Some(e);
                    break;
                }
            }
        }
        drop(stream);
        self.generation.finish(&token);

        let (notice, outcome, phase) = match ending {
            None => (None, TurnOutcome::Streamed, "completed"),
            Some(GenerationError::Cancelled) => (
                Some(CANCELLED_NOTICE.to_string()),
                TurnOutcome::Cancelled,
                "cancelled",
            ),
            Some(GenerationError::CapabilityMissing) => (
                Some(CHAT_UNAVAILABLE_NOTICE.to_string()),
                TurnOutcome::Failed(CHAT_UNAVAILABLE_NOTICE.to_string()),
                "failed",
            ),
            Some(GenerationError::Failed(msg)) => {
                tracing::warn!("Generation failed: {}", msg);
                (
                    Some(format!("{}{}", ERROR_PREFIX, msg)),
                    TurnOutcome::Failed(msg),
                    "failed",
                )
            }
        };

        let applied = self.update(|inner| {
            if let Some(notice) = notice {
                inner.conversation.push_model(notice);
            }
            inner.state = LifecycleState::Ready;
        });
        if applied.is_none() {
            return TurnOutcome::Abandoned;
        }

        let detail = match &outcome {
            TurnOutcome::Failed(msg) => Some(msg.clone()),
            _ => None,
        };
        self.emit_generation(phase, detail);
        outcome
    }
}

/// One conversation session.
///
/// Must be used from within a tokio runtime; background work is spawned.
/// Dropping the controller tears the session down.
pub struct ChatController {
    session: Arc<Session>,
}

impl ChatController {
    pub fn new(
        host: Arc<EngineHost>,
        consent: Arc<dyn ConsentPrompt>,
        config: ControllerConfig,
    ) -> Self {
        let state = resolve_initial_state(&host);
        tracing::debug!(state = state.as_str(), "Chat session created");
        emit_event(
            host.events().as_ref(),
            event_names::LIFECYCLE_STATE,
            &LifecycleStateEvent::now(state.as_str()),
        );

        let inner = Inner {
            state,
            conversation: Conversation::new(),
            simulating: false,
            progress: None,
            torn_down: false,
        };
        let (snapshot, _) = watch::channel(inner.snapshot());
        let simulated =
            SimulatedResponder::new(config.simulated_delay, config.simulated_reply.clone());

        Self {
            session: Arc::new(Session {
                host,
                consent,
                config,
                simulated,
                inner: Mutex::new(inner),
                snapshot,
                generation: CancellationSlot::new(),
                teardown: CancellationToken::new(),
            }),
        }
    }

    /// Ask for consent if this session starts `Unconsented` and no other
    /// session in the process has asked yet.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.state() != LifecycleState::Unconsented {
            return None;
        }
        if !self.session.host.claim_consent_prompt() {
            tracing::debug!("Consent already requested in this process");
            return None;
        }
        let session = self.session.clone();
        Some(tokio::spawn(session.run_consent()))
    }

    /// Submit user text. Returns `None` when the turn is refused: empty text,
    /// a turn or acquisition already running, or a torn-down session.
    pub fn submit_turn(&self, text: &str) -> Option<TurnHandle> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let engine = self.session.host.engine();
        let session = &self.session;
        let (route, history) = session
            .update(|inner| {
                if inner.busy() {
                    return None;
                }
                let history = inner.conversation.messages().to_vec();
                inner.conversation.push_user(text);

                let route = match (inner.state, engine) {
                    (LifecycleState::Ready, Some(engine)) => {
                        inner.state = LifecycleState::Generating;
                        Route::Stream(engine, session.generation.begin_token())
                    }
                    (LifecycleState::ArtifactPresentNotLoaded, _) => {
                        inner.state = LifecycleState::Acquiring;
                        inner.progress = Some(AcquisitionProgress::requesting());
                        Route::Lazy
                    }
                    _ => {
                        inner.simulating = true;
                        Route::Simulate
                    }
                };
                Some((route, history))
            })
            .flatten()?;

        let session = self.session.clone();
        Some(tokio::spawn(session.run_turn(route, history, text.to_string())))
    }

    /// Cancel the running generation. Only has an effect while `Generating`.
    pub fn stop(&self) -> bool {
        if self.state() != LifecycleState::Generating {
            return false;
        }
        let cancelled = self.session.generation.cancel();
        if cancelled {
            tracing::info!("Generation stop requested");
        }
        cancelled
    }

    /// Explicitly download and initialize the engine.
    ///
    /// Valid from `Declined`, `Unconsented` and `ArtifactPresentNotLoaded`.
    /// If the process already has an engine the session becomes `Ready`
    /// immediately and no task is spawned.
    pub fn download(&self) -> Option<JoinHandle<()>> {
        const FROM: [LifecycleState; 3] = [
            LifecycleState::Declined,
            LifecycleState::Unconsented,
            LifecycleState::ArtifactPresentNotLoaded,
        ];

        if self.session.host.engine().is_some() {
            self.session.update(|inner| {
                if !inner.busy() && FROM.contains(&inner.state) {
                    inner.state = LifecycleState::Ready;
                }
            });
            return None;
        }

        let previous = self.session.begin_acquisition(&FROM, false)?;
        let session = self.session.clone();
        Some(tokio::spawn(async move {
            session.run_explicit_acquisition(previous).await;
        }))
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.session.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.session.snapshot.borrow().clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.session.state()
    }

    pub fn host(&self) -> &Arc<EngineHost> {
        &self.session.host
    }

    pub fn is_torn_down(&self) -> bool {
        self.session.lock().torn_down
    }

    /// Stop observing: cancel any stream, abandon any wait. Idempotent.
    pub fn teardown(&self) {
        {
            let mut inner = self.session.lock();
            if inner.torn_down {
                return;
            }
            inner.torn_down = true;
        }
        self.session.teardown.cancel();
        self.session.generation.cancel();
        tracing::debug!("Chat session torn down");
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.teardown();
    }
}
