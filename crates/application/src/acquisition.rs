//! Download-and-initialize, at most once per process.
//!
//! The first caller spawns the provider call as a task; later callers join
//! it through a shared future and a `watch` channel carrying progress. The
//! task publishes the engine only if at least one caller is still waiting
//! for it when it arrives.

use crate::constants::{STATUS_LOADING, STATUS_READY, STATUS_REQUESTING};
use crate::engine_host::EngineSlot;
use futures::future::{BoxFuture, FutureExt, Shared};
use localchat_engine::{EngineHandle, EngineProvider, InitProgressReport};
use localchat_events::{
    emit_event, event_names, AcquisitionErrorEvent, AcquisitionProgressEvent, EventBusRef,
};
use localchat_models::{ArtifactRegistry, ModelSpec};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("acquisition failed: {0}")]
    Failed(String),
    /// Every interested caller tore down before the engine arrived.
    #[error("acquisition abandoned")]
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionProgress {
    pub status_text: String,
    /// 0..=100, never decreasing within one acquisition.
    pub percent: u8,
}

impl AcquisitionProgress {
    pub fn requesting() -> Self {
        Self {
            status_text: STATUS_REQUESTING.to_string(),
            percent: 0,
        }
    }

    pub fn ready() -> Self {
        Self {
            status_text: STATUS_READY.to_string(),
            percent: 100,
        }
    }

    fn advance(&self, report: &InitProgressReport) -> Self {
        let status_text = report
            .text
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| STATUS_LOADING.to_string());
        let percent = report
            .progress
            .map(normalize_percent)
            .unwrap_or(self.percent)
            .max(self.percent);
        Self {
            status_text,
            percent,
        }
    }

    fn to_event(&self) -> AcquisitionProgressEvent {
        AcquisitionProgressEvent {
            status_text: self.status_text.clone(),
            percent: self.percent,
        }
    }
}

/// Map a backend fraction to a percentage. Anything at or past 1.0 is 100.
pub fn normalize_percent(progress: f64) -> u8 {
    if progress.is_nan() || progress <= 0.0 {
        0
    } else if progress >= 1.0 {
        100
    } else {
        (progress * 100.0).round().min(100.0) as u8
    }
}

pub type ProgressSink<'a> = dyn Fn(AcquisitionProgress) + Send + Sync + 'a;

type SharedOutcome = Shared<BoxFuture<'static, Result<EngineHandle, AcquisitionError>>>;

struct InFlight {
    id: u64,
    outcome: SharedOutcome,
    progress: watch::Receiver<AcquisitionProgress>,
    waiters: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Flights {
    next_id: u64,
    current: Option<InFlight>,
}

enum Joined {
    Ready(EngineHandle),
    Waiting {
        outcome: SharedOutcome,
        progress: watch::Receiver<AcquisitionProgress>,
        waiters: Arc<AtomicUsize>,
    },
}

/// Decrements the waiter count however the caller leaves.
struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AcquisitionPipeline {
    provider: Arc<dyn EngineProvider>,
    model: ModelSpec,
    slot: Arc<EngineSlot>,
    registry: ArtifactRegistry,
    events: EventBusRef,
    flights: Arc<Mutex<Flights>>,
}

impl AcquisitionPipeline {
    pub fn new(
        provider: Arc<dyn EngineProvider>,
        model: ModelSpec,
        slot: Arc<EngineSlot>,
        registry: ArtifactRegistry,
        events: EventBusRef,
    ) -> Self {
        Self {
            provider,
            model,
            slot,
            registry,
            events,
            flights: Arc::new(Mutex::new(Flights::default())),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.flights
            .lock()
            .expect("acquisition state poisoned")
            .current
            .is_some()
    }

    /// Return the process-wide engine, creating it if needed.
    ///
    /// `sink` sees the latest progress whenever it changes. A slow sink may
    /// miss intermediate values but always sees the most recent one. When
    /// `teardown` fires this caller stops waiting and gets `Abandoned`.
    pub async fn acquire(
        &self,
        sink: &ProgressSink<'_>,
        teardown: &CancellationToken,
    ) -> Result<EngineHandle, AcquisitionError> {
        if let Some(engine) = self.slot.get() {
            return Ok(engine);
        }

        let (mut outcome, mut progress, waiters) = match self.join_or_start() {
            Joined::Ready(engine) => return Ok(engine),
            Joined::Waiting {
                outcome,
                progress,
                waiters,
            } => (outcome, progress, waiters),
        };
        let _guard = WaiterGuard(waiters);

        sink(progress.borrow_and_update().clone());
        let mut progress_open = true;

        loop {
            tokio::select! {
                biased;
                _ = teardown.cancelled() => {
                    tracing::debug!("Caller tore down while waiting for acquisition");
                    return Err(AcquisitionError::Abandoned);
                }
                changed = progress.changed(), if progress_open => match changed {
                    Ok(()) => sink(progress.borrow_and_update().clone()),
                    Err(_) => progress_open = false,
                },
                result = &mut outcome => return result,
            }
        }
    }

    fn join_or_start(&self) -> Joined {
        let mut flights = self.flights.lock().expect("acquisition state poisoned");

        if let Some(engine) = self.slot.get() {
            return Joined::Ready(engine);
        }

        if let Some(flight) = &flights.current {
            flight.waiters.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(id = flight.id, "Joining in-flight acquisition");
            return Joined::Waiting {
                outcome: flight.outcome.clone(),
                progress: flight.progress.clone(),
                waiters: flight.waiters.clone(),
            };
        }

        flights.next_id += 1;
        let id = flights.next_id;
        let (progress_tx, progress_rx) = watch::channel(AcquisitionProgress::requesting());
        let waiters = Arc::new(AtomicUsize::new(1));
        emit_event(
            self.events.as_ref(),
            event_names::ACQUISITION_PROGRESS,
            &AcquisitionProgress::requesting().to_event(),
        );

        let job = Job {
            id,
            provider: self.provider.clone(),
            model: self.model.clone(),
            slot: self.slot.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            flights: self.flights.clone(),
            waiters: waiters.clone(),
            progress: progress_tx,
        };
        let task = tokio::spawn(job.run());
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AcquisitionError::Failed(e.to_string())),
            }
        }
        .boxed()
        .shared();

        flights.current = Some(InFlight {
            id,
            outcome: outcome.clone(),
            progress: progress_rx.clone(),
            waiters: waiters.clone(),
        });

        Joined::Waiting {
            outcome,
            progress: progress_rx,
            waiters,
        }
    }
}

struct Job {
    id: u64,
    provider: Arc<dyn EngineProvider>,
    model: ModelSpec,
    slot: Arc<EngineSlot>,
    registry: ArtifactRegistry,
    events: EventBusRef,
    flights: Arc<Mutex<Flights>>,
    waiters: Arc<AtomicUsize>,
    progress: watch::Sender<AcquisitionProgress>,
}

impl Job {
    async fn run(self) -> Result<EngineHandle, AcquisitionError> {
        tracing::info!(
            model = %self.model.id,
            provider = self.provider.name(),
            "Starting engine acquisition"
        );

        let on_progress = |report: InitProgressReport| {
            let mut changed = None;
            self.progress.send_if_modified(|current| {
                let next = current.advance(&report);
                if *current == next {
                    return false;
                }
                *current = next.clone();
                changed = Some(next);
                true
            });
            if let Some(progress) = changed {
                tracing::debug!(percent = progress.percent, status = %progress.status_text, "Acquisition progress");
                emit_event(
                    self.events.as_ref(),
                    event_names::ACQUISITION_PROGRESS,
                    &progress.to_event(),
                );
            }
        };

        let created = self.provider.create(&self.model, &on_progress).await;

        let mut flights = self.flights.lock().expect("acquisition state poisoned");
        let result = match created {
            Ok(engine) if self.waiters.load(Ordering::SeqCst) == 0 => {
                tracing::info!(model = %self.model.id, "No session is waiting; disposing new engine");
                engine.dispose();
                Err(AcquisitionError::Abandoned)
            }
            Ok(engine) => {
                self.slot.publish(engine.clone());
                self.registry.mark_downloaded();
                let ready = AcquisitionProgress::ready();
                self.progress.send_replace(ready.clone());
                emit_event(
                    self.events.as_ref(),
                    event_names::ACQUISITION_PROGRESS,
                    &ready.to_event(),
                );
                emit_event(
                    self.events.as_ref(),
                    event_names::ACQUISITION_COMPLETE,
                    &ready.to_event(),
                );
                tracing::info!(model = %self.model.id, "Engine ready");
                Ok(engine)
            }
            Err(e) => {
                tracing::warn!(model = %self.model.id, "Engine acquisition failed: {}", e);
                emit_event(
                    self.events.as_ref(),
                    event_names::ACQUISITION_ERROR,
                    &AcquisitionErrorEvent {
                        model: self.model.id.clone(),
                        error: e.to_string(),
                    },
                );
                Err(AcquisitionError::Failed(e.to_string()))
            }
        };

        if flights.current.as_ref().is_some_and(|f| f.id == self.id) {
            flights.current = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localchat_engine::mock::{MockEngine, MockProvider};
    use localchat_events::InMemoryEventBus;
    use localchat_storage::MemoryStore;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Fixture {
        pipeline: Arc<AcquisitionPipeline>,
        provider: Arc<MockProvider>,
        slot: Arc<EngineSlot>,
        registry: ArtifactRegistry,
        events: Arc<InMemoryEventBus>,
    }

    fn fixture(provider: MockProvider) -> Fixture {
        let provider = Arc::new(provider);
        let slot = Arc::new(EngineSlot::default());
        let registry = ArtifactRegistry::new(Arc::new(MemoryStore::new()));
        let events = Arc::new(InMemoryEventBus::new());
        let pipeline = Arc::new(AcquisitionPipeline::new(
            provider.clone(),
            ModelSpec::default(),
            slot.clone(),
            registry.clone(),
            events.clone(),
        ));
        Fixture {
            pipeline,
            provider,
            slot,
            registry,
            events,
        }
    }

    fn engine() -> Arc<MockEngine> {
        Arc::new(MockEngine::new(["ok"]))
    }

    #[test]
    fn test_normalize_percent() {
        assert_eq!(normalize_percent(-0.5), 0);
        assert_eq!(normalize_percent(0.0), 0);
        assert_eq!(normalize_percent(0.504), 50);
        assert_eq!(normalize_percent(0.999), 100);
        assert_eq!(normalize_percent(1.0), 100);
        assert_eq!(normalize_percent(3.7), 100);
        assert_eq!(normalize_percent(f64::NAN), 0);
    }

    #[test]
    fn test_advance_never_goes_backwards() {
        let current = AcquisitionProgress {
            status_text: "x".into(),
            percent: 60,
        };
        let next = current.advance(&InitProgressReport {
            text: None,
            progress: Some(0.2),
        });
        assert_eq!(next.percent, 60);
        assert_eq!(next.status_text, STATUS_LOADING);
    }

    #[tokio::test]
    async fn test_success_publishes_and_marks_downloaded() {
        let f = fixture(MockProvider::new(engine()));
        let handle = f
            .pipeline
            .acquire(&|_| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.model_id(), "mock-model");
        assert!(f.slot.get().is_some());
        assert!(f.registry.has_downloaded_artifact());
        assert!(!f.pipeline.is_in_flight());
        assert_eq!(f.events.events_for(event_names::ACQUISITION_COMPLETE).len(), 1);
    }

    #[tokio::test]
    async fn test_second_acquire_uses_existing_engine() {
        let f = fixture(MockProvider::new(engine()));
        let teardown = CancellationToken::new();
        f.pipeline.acquire(&|_| {}, &teardown).await.unwrap();
        f.pipeline.acquire(&|_| {}, &teardown).await.unwrap();
        assert_eq!(f.provider.creates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_creation() {
        let f = fixture(
            MockProvider::new(engine())
                .with_reports(vec![InitProgressReport::new("Fetching", 0.5)])
                .with_report_delay(Duration::from_millis(50)),
        );
        let teardown = CancellationToken::new();
        let sink = |_: AcquisitionProgress| {};

        let (a, b) = tokio::join!(
            f.pipeline.acquire(&sink, &teardown),
            f.pipeline.acquire(&sink, &teardown),
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(f.provider.creates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_normalized_and_ends_at_100() {
        let f = fixture(
            MockProvider::new(engine())
                .with_reports(vec![
                    InitProgressReport::new("Fetching", 0.0),
                    InitProgressReport::new("Fetching", 0.5),
                    InitProgressReport::new("Fetching", 1.0),
                ])
                .with_report_delay(Duration::from_millis(10)),
        );
        let seen = Mutex::new(Vec::new());
        let sink = |p: AcquisitionProgress| seen.lock().unwrap().push(p);

        f.pipeline
            .acquire(&sink, &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        let mut percents: Vec<u8> = seen.iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        percents.dedup();
        assert_eq!(percents, vec![0, 50, 100]);
        assert_eq!(seen.first().unwrap().status_text, STATUS_REQUESTING);
        assert_eq!(seen.last().unwrap(), &AcquisitionProgress::ready());
    }

    #[tokio::test]
    async fn test_failure_leaves_registry_untouched() {
        let f = fixture(MockProvider::new(engine()).failing("offline"));
        let result = f.pipeline.acquire(&|_| {}, &CancellationToken::new()).await;

        assert!(matches!(result, Err(AcquisitionError::Failed(m)) if m.contains("offline")));
        assert!(f.slot.get().is_none());
        assert!(!f.registry.has_downloaded_artifact());
        assert!(!f.pipeline.is_in_flight());
        assert_eq!(f.events.events_for(event_names::ACQUISITION_ERROR).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_engine_is_disposed_not_published() {
        let gate = Arc::new(Notify::new());
        let f = fixture(MockProvider::new(engine()).with_gate(gate.clone()));
        let teardown = CancellationToken::new();

        let pipeline = f.pipeline.clone();
        let waiter_teardown = teardown.clone();
        let waiter =
            tokio::spawn(async move { pipeline.acquire(&|_| {}, &waiter_teardown).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.pipeline.is_in_flight());
        teardown.cancel();
        assert_eq!(waiter.await.unwrap().err(), Some(AcquisitionError::Abandoned));

        gate.notify_one();
        while f.pipeline.is_in_flight() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(f.slot.get().is_none());
        assert!(!f.registry.has_downloaded_artifact());
        assert_eq!(f.provider.engine().disposed(), 1);
    }
}
