//! A registered tenant: its store, its poller and its metadata.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{CacError, Result};
use crate::fetch::{FetchOutcome, Fetcher};
use crate::poller::{PollStatus, PollTarget, Poller};
use crate::snapshot::Snapshot;
use crate::store::ConfigStore;

/// One tenant's configuration client.
///
/// Cheap to share behind an `Arc`; the registry owns the canonical reference and hands out
/// counted [`ClientHandle`](crate::ClientHandle) tokens.
pub struct Client {
    tenant: String,
    hostname: String,
    update_frequency: Duration,
    store: Arc<ConfigStore>,
    status: Arc<PollStatus>,
    fetcher: Arc<dyn Fetcher>,
    poller: AsyncMutex<Option<Poller>>,
    handles: AtomicUsize,
}

impl Client {
    pub(crate) fn new(tenant: &str, hostname: &str, update_frequency: Duration, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            tenant: tenant.to_string(),
            hostname: hostname.trim_end_matches('/').to_string(),
            update_frequency,
            store: Arc::new(ConfigStore::new()),
            status: Arc::new(PollStatus::default()),
            fetcher,
            poller: AsyncMutex::new(None),
            handles: AtomicUsize::new(0),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn update_frequency(&self) -> Duration {
        self.update_frequency
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Current snapshot, or `NotLoaded` if nothing has been published yet.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.store.current().ok_or_else(|| CacError::NotLoaded {
            tenant: self.tenant.clone(),
        })
    }

    /// Error from the latest background poll, `None` if it succeeded.
    pub fn last_poll_error(&self) -> Result<Option<CacError>> {
        self.status.last_error()
    }

    /// When the poller last talked to the server, successfully or not.
    pub fn last_poll_attempt(&self) -> Result<Option<DateTime<Utc>>> {
        self.status.last_attempt()
    }

    /// Number of outstanding handles.
    pub fn handle_count(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.as_ref().is_some_and(Poller::is_running)
    }

    pub(crate) async fn initial_fetch(&self) -> Result<()> {
        match self.fetcher.fetch(&self.tenant, &self.hostname, None).await? {
            FetchOutcome::Modified { document, last_modified } => {
                self.store.publish(Snapshot::initial(document, last_modified));
                Ok(())
            }
            FetchOutcome::NotModified => Err(CacError::Transport(format!(
                "server answered not-modified to the initial fetch for tenant `{}`",
                self.tenant
            ))),
        }
    }

    /// Arm the poller unless one is already running or the client is retired. Returns whether a
    /// new one was spawned.
    pub(crate) async fn start_polling(&self) -> bool {
        let mut poller = self.poller.lock().await;
        // `retire` seals before taking this lock, so a poller armed here is always stopped by it.
        if self.store.is_sealed() || poller.as_ref().is_some_and(Poller::is_running) {
            return false;
        }
        *poller = Some(Poller::spawn(PollTarget {
            tenant: self.tenant.clone(),
            hostname: self.hostname.clone(),
            interval: self.update_frequency,
            store: Arc::clone(&self.store),
            status: Arc::clone(&self.status),
            fetcher: Arc::clone(&self.fetcher),
        }));
        true
    }

    pub(crate) async fn stop_polling(&self, grace: Duration) {
        let poller = self.poller.lock().await.take();
        if let Some(poller) = poller {
            poller.stop(&self.tenant, grace).await;
        }
    }

    /// Seal the store and stop polling; nothing is published for this client afterwards.
    pub(crate) async fn retire(&self, grace: Duration) {
        self.store.seal();
        self.stop_polling(grace).await;
    }

    pub(crate) fn acquire_handle(&self) {
        self.handles.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of handles left.
    pub(crate) fn release_handle(&self) -> usize {
        let previous = self
            .handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tenant", &self.tenant)
            .field("hostname", &self.hostname)
            .field("update_frequency", &self.update_frequency)
            .field("handles", &self.handle_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct StaticFetcher;

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _tenant: &str, _hostname: &str, _since: Option<DateTime<Utc>>) -> Result<FetchOutcome> {
            let mut document = Map::new();
            document.insert("a".to_string(), json!(1));
            Ok(FetchOutcome::Modified {
                document,
                last_modified: None,
            })
        }
    }

    fn client() -> Client {
        Client::new("acme", "http://cfg.example/", Duration::from_secs(60), Arc::new(StaticFetcher))
    }

    #[test]
    fn test_new_trims_hostname() {
        assert_eq!(client().hostname(), "http://cfg.example");
    }

    #[test]
    fn test_snapshot_before_load_is_not_loaded() {
        let err = client().snapshot().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotLoaded);
    }

    #[tokio::test]
    async fn test_initial_fetch_publishes() {
        let client = client();
        client.initial_fetch().await.unwrap();
        assert_eq!(client.snapshot().unwrap().document()["a"], json!(1));
    }

    #[test]
    fn test_handle_counting() {
        let client = client();
        client.acquire_handle();
        client.acquire_handle();
        assert_eq!(client.handle_count(), 2);
        assert_eq!(client.release_handle(), 1);
        assert_eq!(client.release_handle(), 0);
        assert_eq!(client.release_handle(), 0);
    }

    #[tokio::test]
    async fn test_start_polling_is_idempotent() {
        let client = client();
        assert!(client.start_polling().await);
        assert!(!client.start_polling().await);
        assert!(client.is_polling().await);

        client.stop_polling(Duration::from_secs(1)).await;
        assert!(!client.is_polling().await);
        assert!(client.start_polling().await);
        client.retire(Duration::from_secs(1)).await;
        assert!(client.store().is_sealed());
    }

    #[tokio::test]
    async fn test_retired_client_cannot_poll_again() {
        let client = client();
        client.initial_fetch().await.unwrap();
        assert!(client.start_polling().await);
        client.retire(Duration::from_secs(1)).await;

        assert!(!client.start_polling().await);
        assert!(!client.is_polling().await);
    }
}
