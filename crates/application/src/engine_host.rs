//! Process-wide engine ownership.
//!
//! A host process builds one `EngineHost` and hands it to every chat
//! session. Sessions come and go; the engine, the in-flight acquisition, and
//! the "consent already asked" flag outlive them.

use crate::acquisition::AcquisitionPipeline;
use localchat_engine::{EngineHandle, EngineProvider};
use localchat_events::EventBusRef;
use localchat_models::{ArtifactRegistry, ModelSpec};
use localchat_storage::KeyValueStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Holds the engine once it exists. Written once, read by every session.
#[derive(Default)]
pub struct EngineSlot {
    engine: RwLock<Option<EngineHandle>>,
}

impl EngineSlot {
    pub fn get(&self) -> Option<EngineHandle> {
        self.engine
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn publish(&self, engine: EngineHandle) {
        let mut slot = self
            .engine
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(engine);
    }

    pub fn is_loaded(&self) -> bool {
        self.get().is_some()
    }
}

pub struct EngineHost {
    model: ModelSpec,
    slot: Arc<EngineSlot>,
    registry: ArtifactRegistry,
    pipeline: AcquisitionPipeline,
    events: EventBusRef,
    consent_prompted: AtomicBool,
}

impl EngineHost {
    pub fn new(
        provider: Arc<dyn EngineProvider>,
        model: ModelSpec,
        store: Arc<dyn KeyValueStore>,
        events: EventBusRef,
    ) -> Arc<Self> {
        let slot = Arc::new(EngineSlot::default());
        let registry = ArtifactRegistry::new(store);
        let pipeline = AcquisitionPipeline::new(
            provider,
            model.clone(),
            slot.clone(),
            registry.clone(),
            events.clone(),
        );
        tracing::debug!(model = %model.id, "Engine host created");
        Arc::new(Self {
            model,
            slot,
            registry,
            pipeline,
            events,
            consent_prompted: AtomicBool::new(false),
        })
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn engine(&self) -> Option<EngineHandle> {
        self.slot.get()
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &AcquisitionPipeline {
        &self.pipeline
    }

    pub fn events(&self) -> &EventBusRef {
        &self.events
    }

    /// Claim the one consent prompt this process may show.
    ///
    /// Returns true for exactly one caller.
    pub fn claim_consent_prompt(&self) -> bool {
        !self.consent_prompted.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localchat_engine::mock::{MockEngine, MockProvider};
    use localchat_events::NullEventBus;
    use localchat_storage::MemoryStore;

    fn host() -> Arc<EngineHost> {
        EngineHost::new(
            Arc::new(MockProvider::new(Arc::new(MockEngine::new(["x"])))),
            ModelSpec::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullEventBus),
        )
    }

    #[test]
    fn test_consent_prompt_claimed_once() {
        let host = host();
        assert!(host.claim_consent_prompt());
        assert!(!host.claim_consent_prompt());
    }

    #[test]
    fn test_slot_starts_empty() {
        let host = host();
        assert!(host.engine().is_none());

        let slot = EngineSlot::default();
        slot.publish(Arc::new(MockEngine::new(["x"])));
        assert!(slot.is_loaded());
    }
}
