//! Background polling task, one per client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{CacError, Result};
use crate::fetch::{FetchOutcome, Fetcher};
use crate::store::ConfigStore;

/// Outcome of the most recent unattended poll.
///
/// Background failures land here instead of any caller's error slot.
#[derive(Debug, Default)]
pub struct PollStatus {
    last_error: Mutex<Option<CacError>>,
    last_attempt: Mutex<Option<DateTime<Utc>>>,
}

impl PollStatus {
    pub fn last_error(&self) -> Result<Option<CacError>> {
        let guard = self.last_error.lock().map_err(|_| CacError::poisoned("poll status"))?;
        Ok(guard.clone())
    }

    pub fn last_attempt(&self) -> Result<Option<DateTime<Utc>>> {
        let guard = self.last_attempt.lock().map_err(|_| CacError::poisoned("poll status"))?;
        Ok(*guard)
    }

    fn record(&self, outcome: std::result::Result<(), CacError>) {
        if let Ok(mut attempt) = self.last_attempt.lock() {
            *attempt = Some(Utc::now());
        }
        if let Ok(mut error) = self.last_error.lock() {
            *error = outcome.err();
        }
    }
}

/// Everything one polling loop needs about its client.
#[derive(Clone)]
pub(crate) struct PollTarget {
    pub tenant: String,
    pub hostname: String,
    pub interval: Duration,
    pub store: Arc<ConfigStore>,
    pub status: Arc<PollStatus>,
    pub fetcher: Arc<dyn Fetcher>,
}

/// Handle to a running polling task.
pub(crate) struct Poller {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Spawn the polling loop on the current tokio runtime.
    ///
    /// The loop waits `interval` after each cycle before the next fetch, so fetches for one
    /// tenant never overlap.
    pub fn spawn(target: PollTarget) -> Self {
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(run(target, cancelled));
        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal cancellation and wait up to `grace` for the loop to exit.
    ///
    /// Past the grace period the task is detached; whatever its in-flight fetch returns is
    /// dropped without publishing.
    pub async fn stop(self, tenant: &str, grace: Duration) {
        let _ = self.cancel.send(true);
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => tracing::info!(tenant, "poller stopped"),
            Ok(Err(e)) => tracing::warn!(tenant, error = %e, "poller ended abnormally"),
            Err(_) => tracing::warn!(tenant, grace_ms = grace.as_millis() as u64, "poller did not stop in time, detaching"),
        }
    }
}

async fn run(target: PollTarget, mut cancelled: watch::Receiver<bool>) {
    let tenant = target.tenant.as_str();
    tracing::info!(tenant, interval_ms = target.interval.as_millis() as u64, "poller started");

    loop {
        if *cancelled.borrow() || target.store.is_sealed() {
            break;
        }
        tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            _ = tokio::time::sleep(target.interval) => {}
        }
        if target.store.is_sealed() {
            break;
        }

        let since = target.store.current().and_then(|s| s.source_last_modified());
        let outcome = tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            outcome = target.fetcher.fetch(tenant, &target.hostname, since) => outcome,
        };
        if *cancelled.borrow() {
            break;
        }

        match outcome {
            Ok(FetchOutcome::Modified { document, last_modified }) => {
                match target.store.publish_document(document, last_modified) {
                    Some(snapshot) => {
                        tracing::info!(tenant, version = snapshot.version(), "published new configuration")
                    }
                    None => break,
                }
                target.status.record(Ok(()));
            }
            Ok(FetchOutcome::NotModified) => {
                tracing::debug!(tenant, "remote not modified, keeping current snapshot");
                target.status.record(Ok(()));
            }
            Err(e) => {
                tracing::warn!(tenant, error = %e, "poll failed, keeping stale snapshot");
                target.status.record(Err(e));
            }
        }
    }

    tracing::debug!(tenant, "poller loop exited");
}
