//! Per-thread error slot backing `last_error_message` / `last_error_length`.
//!
//! Only the ABI layer writes here. Everything below it returns `Result`.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{CacError, Result};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub(crate) fn set(err: &CacError) {
    let message = err.to_string();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

pub(crate) fn clear() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message of the calling thread's last failure, if the last fallible call failed.
pub fn message() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Byte length of [`message`], 0 when empty.
pub fn length() -> usize {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, String::len))
}

/// Run one ABI call: record its failure in the slot, or clear the slot on success.
///
/// Panics are caught and reported as `Internal` so they never unwind into foreign code.
pub(crate) fn capture<T>(call: impl FnOnce() -> Result<T>) -> Option<T> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(CacError::Internal(format!("panic in configuration client: {}", detail)))
    });
    match outcome {
        Ok(value) => {
            clear();
            Some(value)
        }
        Err(e) => {
            set(&e);
            None
        }
    }
}
