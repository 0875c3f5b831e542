use std::sync::{Arc, PoisonError, RwLock};

use docqa_core::error::Result;

use crate::format::Manifest;
use crate::index::VectorIndex;
use crate::store::IndexStore;

/// One immutable, fully loaded index version.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub version: String,
    pub manifest: Manifest,
    pub index: VectorIndex,
}

/// Holds the snapshot served to new requests.
///
/// Readers clone the `Arc` and keep it for the whole request; `publish`
/// swaps the pointer, so in-flight requests finish on the version they
/// started with.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl SnapshotStore {
    pub fn new(initial: IndexSnapshot) -> Self { Self { current: RwLock::new(Arc::new(initial)) } }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swap in `next`, returning the previously served snapshot.
    pub fn publish(&self, next: IndexSnapshot) -> Arc<IndexSnapshot> {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    /// Load and publish the store's current version if it differs from the
    /// one being served. A version that fails verification or is refused by
    /// `accept` is not published.
    pub fn reload_if_changed<F>(&self, store: &IndexStore, accept: F) -> Result<bool>
    where
        F: FnOnce(&IndexSnapshot) -> Result<()>,
    {
        let Some(latest) = store.current_version()? else {
            return Ok(false);
        };
        if latest == self.snapshot().version {
            return Ok(false);
        }
        let next = store.load_version(&latest)?;
        accept(&next)?;
        let prev = self.publish(next);
        tracing::info!(from = %prev.version, to = %latest, "published new index snapshot");
        Ok(true)
    }
}
