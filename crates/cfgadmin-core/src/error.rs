//! Error types for cfgadmin core
//!
//! Three families of failure:
//! - Storage failures raised by persistence backends
//! - Callback failures raised by consumers and listeners
//! - Administrative failures returned to callers of the manager

use cfgadmin_filter::FilterError;

/// Failure raised by a persistence backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying I/O failed
    #[error("storage I/O failed for '{id}': {message}")]
    Io { id: String, message: String },

    /// No dictionary stored under the identifier
    #[error("no stored dictionary for '{0}'")]
    NotFound(String),

    /// Stored dictionary could not be interpreted
    #[error("corrupt dictionary '{id}': {reason}")]
    Corrupt { id: String, reason: String },

    /// No backend registered
    #[error("no persistence backend available")]
    NoBackend,
}

impl StorageError {
    /// Create an I/O error for an identifier
    #[inline]
    #[must_use]
    pub fn io(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Failure raised by a consumer or listener callback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The consumer refused the configuration
    #[error("configuration rejected{}: {reason}", property.as_deref().map(|p| format!(" (property {p})")).unwrap_or_default())]
    Rejected {
        /// Offending property, if the consumer named one
        property: Option<String>,
        /// Reason given by the consumer
        reason: String,
    },

    /// Any other failure, including panics
    #[error("unexpected callback failure: {0}")]
    Unexpected(String),
}

impl CallbackError {
    /// Rejection naming an offending property
    #[inline]
    #[must_use]
    pub fn rejected(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            property: Some(property.into()),
            reason: reason.into(),
        }
    }

    /// Check if this is a structured rejection
    #[inline]
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Error returned by the administrative surface
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Persistence failed; the cache is left unchanged
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Filter expression did not parse
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    /// No configuration exists for the pid
    #[error("no configuration for '{0}'")]
    NotFound(String),

    /// The configuration has been deleted
    #[error("configuration '{0}' has been deleted")]
    Deleted(String),

    /// Empty or otherwise unusable pid
    #[error("invalid pid: {0:?}")]
    InvalidPid(String),

    /// Invalid manager settings
    #[error("configuration error: {0}")]
    Config(String),

    /// The manager is shutting down
    #[error("configuration manager is shut down")]
    ShutDown,

    /// A worker thread could not be started
    #[error("worker failure: {0}")]
    Worker(String),
}

impl AdminError {
    /// Check if the error originates from a persistence backend
    #[inline]
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type for administrative operations
pub type Result<T> = std::result::Result<T, AdminError>;

/// Run a consumer, listener or plugin callback, turning a panic into
/// [`CallbackError::Unexpected`]
pub(crate) fn guarded<F>(callback: F) -> std::result::Result<(), CallbackError>
where
    F: FnOnce() -> std::result::Result<(), CallbackError>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string());
            Err(CallbackError::Unexpected(format!("panic: {message}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_message_names_property() {
        let err = CallbackError::rejected("port", "out of range");
        assert!(err.is_rejection());
        assert_eq!(
            err.to_string(),
            "configuration rejected (property port): out of range"
        );

        let bare = CallbackError::Rejected {
            property: None,
            reason: "nope".into(),
        };
        assert_eq!(bare.to_string(), "configuration rejected: nope");
    }

    #[test]
    fn guarded_catches_panics() {
        let err = guarded(|| panic!("boom")).unwrap_err();
        assert_eq!(err, CallbackError::Unexpected("panic: boom".into()));

        let err = guarded(|| Err(CallbackError::rejected("a", "b"))).unwrap_err();
        assert!(err.is_rejection());
        assert!(guarded(|| Ok(())).is_ok());
    }

    #[test]
    fn storage_converts_to_admin() {
        let err: AdminError = StorageError::io("svc.A", "disk full").into();
        assert!(err.is_storage());
        assert!(err.to_string().contains("disk full"));
    }
}
