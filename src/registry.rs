//! Tenant → client registry and opaque handle table.
//!
//! Callers never see a [`Client`] address. [`ClientRegistry::get_client`] mints a fresh
//! [`ClientHandle`] token, and every operation that takes one resolves it through the handle
//! table, so stale or doubly-freed tokens surface as `NotFound` instead of touching freed memory.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::{CacError, Result};
use crate::fetch::Fetcher;
use crate::resolve;
use crate::settings::Settings;

/// Opaque, never-reused token for one acquisition of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(NonZeroU64);

impl ClientHandle {
    /// Raw token value, for crossing the C boundary.
    pub fn into_raw(self) -> u64 {
        self.0.get()
    }

    /// Rebuild a token from its raw value. Zero is never a valid token.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

/// Process-wide set of tenant clients.
///
/// At most one live client per tenant. Lookups and mutations for different tenants never
/// contend on a shared lock.
pub struct ClientRegistry {
    tenants: DashMap<String, Arc<Client>>,
    handles: DashMap<ClientHandle, Arc<Client>>,
    next_handle: AtomicU64,
    fetcher: Arc<dyn Fetcher>,
    settings: Settings,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: Settings) -> Self {
        Self {
            tenants: DashMap::new(),
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
            fetcher,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The process-wide default layer. Read-only after construction.
    pub fn default_layer(&self) -> &Map<String, Value> {
        &self.settings.default_layer
    }

    pub fn is_registered(&self, tenant: &str) -> bool {
        self.tenants.contains_key(tenant)
    }

    /// Register `tenant`, fetch its first document, and arm its poller.
    ///
    /// Re-registering a live tenant succeeds without touching the existing client. If the first
    /// fetch fails nothing is registered.
    pub async fn new_client(&self, tenant: &str, update_frequency: Duration, hostname: &str) -> Result<()> {
        if tenant.trim().is_empty() {
            return Err(CacError::InvalidArgument("tenant must not be empty".to_string()));
        }
        if hostname.trim().is_empty() {
            return Err(CacError::InvalidArgument("hostname must not be empty".to_string()));
        }
        if update_frequency.is_zero() {
            return Err(CacError::InvalidArgument("update frequency must be positive".to_string()));
        }
        if self.is_registered(tenant) {
            tracing::debug!(tenant, "client already registered");
            return Ok(());
        }

        let client = Arc::new(Client::new(tenant, hostname, update_frequency, Arc::clone(&self.fetcher)));
        client.initial_fetch().await?;

        let inserted = match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&client));
                true
            }
        };
        if !inserted {
            tracing::debug!(tenant, "client registered concurrently, discarding duplicate");
            return Ok(());
        }

        client.start_polling().await;
        tracing::info!(tenant, hostname = client.hostname(), "client registered");
        Ok(())
    }

    /// Re-arm the poller of a registered tenant. No-op if it is already running.
    pub async fn start_polling_update(&self, tenant: &str) -> Result<()> {
        let client = self.lookup(tenant)?;
        if client.start_polling().await {
            tracing::info!(tenant, "polling started");
        }
        Ok(())
    }

    /// Pause the poller of a registered tenant without retiring the client.
    pub async fn stop_polling(&self, tenant: &str) -> Result<()> {
        let client = self.lookup(tenant)?;
        client.stop_polling(self.settings.shutdown_grace).await;
        Ok(())
    }

    /// Acquire a new handle on the live client for `tenant`.
    pub fn get_client(&self, tenant: &str) -> Option<ClientHandle> {
        // The shard guard stays alive until the handle is counted, so a concurrent free of the
        // last handle cannot retire this client underneath us.
        let entry = self.tenants.get(tenant)?;
        let client = Arc::clone(entry.value());
        client.acquire_handle();
        let handle = self.mint_handle();
        self.handles.insert(handle, client);
        drop(entry);
        Some(handle)
    }

    /// Resolve a handle to its client.
    pub fn client(&self, handle: ClientHandle) -> Result<Arc<Client>> {
        self.handles
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(CacError::stale_handle)
    }

    /// Release `handle`. Releasing the last handle of a client deregisters its tenant, seals its
    /// store and stops its poller within the shutdown grace period.
    pub async fn free_client(&self, handle: ClientHandle) -> Result<()> {
        let (_, client) = self.handles.remove(&handle).ok_or_else(CacError::stale_handle)?;

        let retired = match self.tenants.entry(client.tenant().to_string()) {
            Entry::Occupied(slot) if Arc::ptr_eq(slot.get(), &client) => {
                if client.release_handle() == 0 {
                    slot.remove();
                    true
                } else {
                    false
                }
            }
            _ => {
                client.release_handle();
                false
            }
        };

        if retired {
            client.retire(self.settings.shutdown_grace).await;
            tracing::info!(tenant = client.tenant(), "client freed");
        }
        Ok(())
    }

    /// See [`resolve::get_config`].
    pub fn get_config(&self, handle: ClientHandle, query: &str) -> Result<Value> {
        resolve::get_config(&*self.client(handle)?, query)
    }

    /// See [`resolve::get_resolved_config`].
    pub fn get_resolved_config(
        &self,
        handle: ClientHandle,
        query: &str,
        filter_keys: &str,
        merge_strategy: &str,
    ) -> Result<Map<String, Value>> {
        let client = self.client(handle)?;
        resolve::get_resolved_config(&client, self.default_layer(), query, filter_keys, merge_strategy)
    }

    /// See [`resolve::get_default_config`]. The handle must be live but only the default layer
    /// is read.
    pub fn get_default_config(&self, handle: ClientHandle, filter_keys: &str) -> Result<Map<String, Value>> {
        self.client(handle)?;
        resolve::get_default_config(self.default_layer(), filter_keys)
    }

    /// See [`resolve::eval_context`].
    pub fn eval_context(
        &self,
        handle: ClientHandle,
        context: &Map<String, Value>,
        filter_keys: &str,
        merge_strategy: &str,
    ) -> Result<Map<String, Value>> {
        resolve::eval_context(&*self.client(handle)?, context, filter_keys, merge_strategy)
    }

    /// See [`resolve::get_last_modified`].
    pub fn get_last_modified(&self, handle: ClientHandle) -> Result<DateTime<Utc>> {
        resolve::get_last_modified(&*self.client(handle)?)
    }

    fn lookup(&self, tenant: &str) -> Result<Arc<Client>> {
        self.tenants
            .get(tenant)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CacError::unknown_tenant(tenant))
    }

    fn mint_handle(&self) -> ClientHandle {
        loop {
            let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if let Some(handle) = ClientHandle::from_raw(raw) {
                return handle;
            }
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("tenants", &self.tenants.len())
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}
