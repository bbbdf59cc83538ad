//! C ABI over the process-wide registry.
//!
//! Conventions shared by every export:
//! - Failures return NULL (or a negative status) and leave a message in the calling thread's
//!   error slot, read back with [`last_error_message`] / [`last_error_length`]. Success clears it.
//! - Every returned `char *` belongs to the caller and must be released exactly once with
//!   [`free_string`].
//! - `ClientHandle *` values are opaque tokens, never addresses. A freed or unknown token is
//!   reported as `not-found`; the library never dereferences it.

use std::ffi::{c_char, c_int, c_ulong, CStr, CString};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::error::{CacError, Result};
use crate::fetch::HttpFetcher;
use crate::last_error;
use crate::registry::{self, ClientRegistry};
use crate::settings::Settings;

/// Opaque client token as seen from C.
#[repr(C)]
pub struct ClientHandle {
    _private: [u8; 0],
}

struct Global {
    runtime: Runtime,
    registry: ClientRegistry,
}

static GLOBAL: OnceCell<Global> = OnceCell::new();

fn global() -> Result<&'static Global> {
    GLOBAL.get_or_try_init(|| {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("cac-poller")
            .build()
            .map_err(|e| CacError::Internal(format!("failed to start runtime: {}", e)))?;
        let settings = Settings::from_env();
        let fetcher = HttpFetcher::new(settings.request_timeout)?;
        let registry = ClientRegistry::new(Arc::new(fetcher), settings);
        Ok(Global { runtime, registry })
    })
}

/// # Safety
/// `ptr` must be NULL or a valid NUL-terminated string that outlives the returned borrow.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(CacError::InvalidArgument(format!("`{}` must not be NULL", name)));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| CacError::InvalidArgument(format!("`{}` is not valid UTF-8", name)))
}

fn handle_arg(handle: *mut ClientHandle) -> Result<registry::ClientHandle> {
    registry::ClientHandle::from_raw(handle as usize as u64)
        .ok_or_else(|| CacError::InvalidArgument("client handle must not be NULL".to_string()))
}

fn handle_out(handle: registry::ClientHandle) -> *mut ClientHandle {
    handle.into_raw() as usize as *mut ClientHandle
}

fn owned_string(text: String) -> Result<*const c_char> {
    CString::new(text)
        .map(|s| s.into_raw() as *const c_char)
        .map_err(|_| CacError::Internal("result contains an interior NUL byte".to_string()))
}

fn owned_json(value: &Value) -> Result<*const c_char> {
    owned_string(value.to_string())
}

/// Byte length of the calling thread's last error message, 0 if none.
#[no_mangle]
pub extern "C" fn last_error_length() -> c_int {
    c_int::try_from(last_error::length()).unwrap_or(c_int::MAX)
}

/// Copy of the calling thread's last error message, NULL if none.
///
/// Release with [`free_string`].
#[no_mangle]
pub extern "C" fn last_error_message() -> *const c_char {
    last_error::message()
        .and_then(|message| owned_string(message).ok())
        .unwrap_or(ptr::null())
}

/// Release a string returned by this library.
///
/// # Safety
/// `s` must be NULL or a pointer returned by this library that has not been released yet.
#[no_mangle]
pub unsafe extern "C" fn free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: produced by `CString::into_raw` in this module and released once per the contract.
    drop(unsafe { CString::from_raw(s) });
}

/// Register `tenant`, fetch its configuration from `hostname` and poll it every
/// `update_frequency` seconds.
///
/// Returns 0 on success (including when the tenant is already registered) and -1 on failure.
///
/// # Safety
/// `tenant` and `hostname` must be NULL or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn new_client(tenant: *const c_char, update_frequency: c_ulong, hostname: *const c_char) -> c_int {
    let registered = last_error::capture(|| {
        // SAFETY: forwarded caller contract.
        let tenant = unsafe { str_arg(tenant, "tenant") }?;
        // SAFETY: forwarded caller contract.
        let hostname = unsafe { str_arg(hostname, "hostname") }?;
        let global = global()?;
        let frequency = Duration::from_secs(u64::from(update_frequency));
        global
            .runtime
            .block_on(global.registry.new_client(tenant, frequency, hostname))
    });
    match registered {
        Some(()) => 0,
        None => -1,
    }
}

/// Re-arm polling for a registered tenant. Unknown tenants are reported through the error slot.
///
/// # Safety
/// `tenant` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn start_polling_update(tenant: *const c_char) {
    last_error::capture(|| {
        // SAFETY: forwarded caller contract.
        let tenant = unsafe { str_arg(tenant, "tenant") }?;
        let global = global()?;
        global.runtime.block_on(global.registry.start_polling_update(tenant))
    });
}

/// Release a handle obtained from [`get_client`].
///
/// Freeing the last handle of a tenant stops its polling and deregisters it. A stale handle is
/// reported as `not-found` and otherwise ignored.
#[no_mangle]
pub extern "C" fn free_client(ptr: *mut ClientHandle) {
    last_error::capture(|| {
        let handle = handle_arg(ptr)?;
        let global = global()?;
        global.runtime.block_on(global.registry.free_client(handle))
    });
}

/// New handle on the client of `tenant`, or NULL if no such tenant is registered.
///
/// # Safety
/// `tenant` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn get_client(tenant: *const c_char) -> *mut ClientHandle {
    last_error::capture(|| {
        // SAFETY: forwarded caller contract.
        let tenant = unsafe { str_arg(tenant, "tenant") }?;
        global()?
            .registry
            .get_client(tenant)
            .map(handle_out)
            .ok_or_else(|| CacError::unknown_tenant(tenant))
    })
    .unwrap_or(ptr::null_mut())
}

/// Publish time of the client's current configuration, RFC 3339 UTC.
#[no_mangle]
pub extern "C" fn get_last_modified(client: *mut ClientHandle) -> *const c_char {
    last_error::capture(|| {
        let handle = handle_arg(client)?;
        let snapshot = global()?.registry.client(handle)?.snapshot()?;
        owned_string(snapshot.last_modified_string())
    })
    .unwrap_or(ptr::null())
}

/// Evaluate `query` against the client's configuration and return it as JSON.
///
/// # Safety
/// `query` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn get_config(client: *mut ClientHandle, query: *const c_char) -> *const c_char {
    last_error::capture(|| {
        let handle = handle_arg(client)?;
        // SAFETY: forwarded caller contract.
        let query = unsafe { str_arg(query, "query") }?;
        owned_json(&global()?.registry.get_config(handle, query)?)
    })
    .unwrap_or(ptr::null())
}

/// Merge the client's configuration selected by `query` over the default layer selected by
/// `filter_keys`, using `merge_strategy`, and return it as JSON.
///
/// # Safety
/// The string arguments must be NULL or valid NUL-terminated strings. A NULL `filter_keys`
/// selects the whole default layer.
#[no_mangle]
pub unsafe extern "C" fn get_resolved_config(
    client: *mut ClientHandle,
    query: *const c_char,
    filter_keys: *const c_char,
    merge_strategy: *const c_char,
) -> *const c_char {
    last_error::capture(|| {
        let handle = handle_arg(client)?;
        // SAFETY: forwarded caller contract.
        let query = unsafe { str_arg(query, "query") }?;
        // SAFETY: forwarded caller contract.
        let filter_keys = unsafe { optional_str_arg(filter_keys, "filter_keys") }?;
        // SAFETY: forwarded caller contract.
        let merge_strategy = unsafe { str_arg(merge_strategy, "merge_strategy") }?;
        let resolved = global()?
            .registry
            .get_resolved_config(handle, query, filter_keys, merge_strategy)?;
        owned_json(&Value::Object(resolved))
    })
    .unwrap_or(ptr::null())
}

/// Subset of the default layer selected by `filter_keys`, as JSON.
///
/// # Safety
/// `filter_keys` must be NULL or a valid NUL-terminated string. NULL selects everything.
#[no_mangle]
pub unsafe extern "C" fn get_default_config(client: *mut ClientHandle, filter_keys: *const c_char) -> *const c_char {
    last_error::capture(|| {
        let handle = handle_arg(client)?;
        // SAFETY: forwarded caller contract.
        let filter_keys = unsafe { optional_str_arg(filter_keys, "filter_keys") }?;
        let subset = global()?.registry.get_default_config(handle, filter_keys)?;
        owned_json(&Value::Object(subset))
    })
    .unwrap_or(ptr::null())
}

/// # Safety
/// Same contract as [`str_arg`]; NULL maps to the empty string.
unsafe fn optional_str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Ok("");
    }
    // SAFETY: forwarded caller contract.
    unsafe { str_arg(ptr, name) }
}
