//! Immutable, versioned configuration documents.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::{Map, Value};

/// One published version of a tenant's configuration document.
///
/// Never mutated after construction; the store swaps whole snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    version: u64,
    document: Map<String, Value>,
    fetched_at: DateTime<Utc>,
    source_last_modified: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// First snapshot of a store.
    pub fn initial(document: Map<String, Value>, source_last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            version: 1,
            document,
            fetched_at: now_micros(),
            source_last_modified,
        }
    }

    /// Snapshot that supersedes `previous`.
    ///
    /// The version is bumped by one and `fetched_at` is strictly later than the previous one, even
    /// if the wall clock stalls or goes backwards.
    pub fn succeeding(
        previous: Option<&Snapshot>,
        document: Map<String, Value>,
        source_last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        let Some(previous) = previous else {
            return Self::initial(document, source_last_modified);
        };
        let now = now_micros();
        Self {
            version: previous.version + 1,
            document,
            fetched_at: now.max(previous.fetched_at + chrono::Duration::microseconds(1)),
            source_last_modified: source_last_modified.or(previous.source_last_modified),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// When this snapshot was published.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// `Last-Modified` reported by the server for this document, if any.
    pub fn source_last_modified(&self) -> Option<DateTime<Utc>> {
        self.source_last_modified
    }

    /// `fetched_at` as RFC 3339 UTC with microsecond precision.
    pub fn last_modified_string(&self) -> String {
        self.fetched_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

// Truncated so the RFC 3339 rendering round-trips exactly.
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
