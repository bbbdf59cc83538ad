//! Multi-tenant context-aware configuration client.
//!
//! Each registered tenant gets a [`Client`] whose configuration document is fetched from a
//! config server, cached as an immutable [`Snapshot`], and refreshed by a background poller.
//! Queries read the current snapshot lock-free and can be merged over a process-wide default
//! layer. Documents in the context-aware shape can also be evaluated against a request context
//! (see [`context`]). The same engine is exported as a C ABI from [`ffi`].

pub mod client;
pub mod context;
pub mod error;
pub mod fetch;
pub mod ffi;
pub mod last_error;
pub mod merge;
mod poller;
pub mod query;
pub mod registry;
pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod store;

pub use client::Client;
pub use context::ContextDocument;
pub use error::{CacError, ErrorKind, Result};
pub use fetch::{FetchOutcome, Fetcher, HttpFetcher};
pub use merge::{merge_replace_arrays, MergeStrategy};
pub use query::Query;
pub use registry::{ClientHandle, ClientRegistry};
pub use settings::Settings;
pub use snapshot::Snapshot;
pub use store::ConfigStore;
