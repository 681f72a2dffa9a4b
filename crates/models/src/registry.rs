//! Persistent record of whether the model artifact was fetched, or the user
//! said no to fetching it.
//!
//! Storage may be missing or blocked. Reads fail open to `false` and writes
//! are logged and dropped, so callers never see a storage error.

use localchat_storage::KeyValueStore;
use std::sync::Arc;

pub const DOWNLOADED_KEY: &str = "localchat_artifact_downloaded_v1";
pub const DECLINED_KEY: &str = "localchat_artifact_downloaded_v1_declined";

const FLAG_SET: &str = "1";

/// Snapshot of both persisted flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsentRecord {
    pub artifact_downloaded: bool,
    pub download_declined: bool,
}

#[derive(Clone)]
pub struct ArtifactRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl ArtifactRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn has_downloaded_artifact(&self) -> bool {
        self.flag(DOWNLOADED_KEY)
    }

    pub fn has_declined_before(&self) -> bool {
        self.flag(DECLINED_KEY)
    }

    pub fn consent_record(&self) -> ConsentRecord {
        ConsentRecord {
            artifact_downloaded: self.has_downloaded_artifact(),
            download_declined: self.has_declined_before(),
        }
    }

    /// Record a successful acquisition. Clears any earlier decline.
    ///
    /// The two flags are never both set: if the decline cannot be cleared,
    /// the downloaded flag is not written either.
    pub fn mark_downloaded(&self) {
        if let Err(e) = self.store.remove(DECLINED_KEY) {
            tracing::warn!("Failed to clear declined flag, not recording download: {}", e);
            return;
        }
        if let Err(e) = self.store.set(DOWNLOADED_KEY, FLAG_SET) {
            tracing::warn!("Failed to persist downloaded flag: {}", e);
        }
    }

    pub fn mark_declined(&self) {
        if let Err(e) = self.store.set(DECLINED_KEY, FLAG_SET) {
            tracing::warn!("Failed to persist declined flag: {}", e);
        }
    }

    fn flag(&self, key: &str) -> bool {
        match self.store.get(key) {
            Ok(value) => value.as_deref() == Some(FLAG_SET),
            Err(e) => {
                tracing::debug!(key, "Flag read failed, treating as unset: {}", e);
                false
            }
        }
    }
}
