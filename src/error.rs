//! Error types for the configuration client.

use std::fmt;

use thiserror::Error;

/// Every failure the client can report.
///
/// Each variant maps to exactly one [`ErrorKind`]. The `Display` output always starts with the
/// kind name, which is what the C ABI writes into the calling thread's error slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacError {
    /// Unknown tenant, stale handle, or a query that selected nothing.
    #[error("not-found: {0}")]
    NotFound(String),

    /// The client exists but no snapshot has been published yet.
    #[error("not-loaded: no configuration loaded yet for tenant `{tenant}`")]
    NotLoaded {
        /// Tenant whose store is still empty.
        tenant: String,
    },

    /// Malformed query, unknown merge strategy, bad ABI argument.
    #[error("invalid-argument: {0}")]
    InvalidArgument(String),

    /// Fetching from the configuration server failed.
    #[error("transport: {0}")]
    Transport(String),

    /// Poisoned lock, runtime start-up failure or a caught panic.
    #[error("internal: {0}")]
    Internal(String),
}

/// Coarse classification of a [`CacError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    NotLoaded,
    InvalidArgument,
    Transport,
    Internal,
}

impl ErrorKind {
    /// Stable kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::NotLoaded => "not-loaded",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacError::NotFound(_) => ErrorKind::NotFound,
            CacError::NotLoaded { .. } => ErrorKind::NotLoaded,
            CacError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CacError::Transport(_) => ErrorKind::Transport,
            CacError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unknown_tenant(tenant: &str) -> Self {
        CacError::NotFound(format!("no client registered for tenant `{}`", tenant))
    }

    pub(crate) fn stale_handle() -> Self {
        CacError::NotFound("client handle is unknown or has already been freed".to_string())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        CacError::Internal(format!("{} lock poisoned", what))
    }
}

impl From<reqwest::Error> for CacError {
    fn from(err: reqwest::Error) -> Self {
        CacError::Transport(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_starts_with_kind() {
        let errors = [
            CacError::NotFound("x".to_string()),
            CacError::NotLoaded { tenant: "acme".to_string() },
            CacError::InvalidArgument("x".to_string()),
            CacError::Transport("x".to_string()),
            CacError::Internal("x".to_string()),
        ];
        for err in errors {
            let prefix = format!("{}: ", err.kind());
            assert!(err.to_string().starts_with(&prefix), "{}", err);
        }
    }

    #[test]
    fn test_not_loaded_names_tenant() {
        let err = CacError::NotLoaded { tenant: "acme".to_string() };
        assert_eq!(err.to_string(), "not-loaded: no configuration loaded yet for tenant `acme`");
    }

    #[test]
    fn test_unknown_tenant_is_not_found() {
        let err = CacError::unknown_tenant("ghost");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::InvalidArgument.as_str(), "invalid-argument");
        assert_eq!(ErrorKind::NotLoaded.to_string(), "not-loaded");
    }
}
