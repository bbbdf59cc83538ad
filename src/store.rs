//! Per-tenant snapshot holder with lock-free reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::snapshot::Snapshot;

/// Holds the current [`Snapshot`] of one client.
///
/// Readers get an `Arc` to a complete snapshot and keep it as long as they like; a concurrent
/// publish swaps the pointer and never touches the old document. Only the client's own poller
/// (and the initial fetch) writes.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: ArcSwapOption<Snapshot>,
    sealed: AtomicBool,
}

impl ConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published snapshot, or `None` before the first publish.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Atomically replace the current snapshot.
    ///
    /// Returns `false` without publishing once the store has been sealed.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.current.store(Some(Arc::new(snapshot)));
        true
    }

    /// Build the successor of the current snapshot from a freshly fetched document and publish it.
    ///
    /// Returns the published snapshot, or `None` if the store is sealed.
    pub fn publish_document(
        &self,
        document: Map<String, Value>,
        source_last_modified: Option<DateTime<Utc>>,
    ) -> Option<Arc<Snapshot>> {
        let previous = self.current();
        let next = Snapshot::succeeding(previous.as_deref(), document, source_last_modified);
        if !self.publish(next) {
            return None;
        }
        self.current()
    }

    /// Reject every later publish. Readers keep seeing the last snapshot.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}
