//! Error types for the resource manager.

use marfs_hash::RingError;
use thiserror::Error;

/// Result type alias for resource-manager operations.
pub type RmanResult<T> = Result<T, RmanError>;

/// Failures raised while walking streams, reclaiming ranges, or dispatching namespaces.
#[derive(Debug, Error)]
pub enum RmanError {
    /// A metadata operation (stat, open, xattr, unlink, scan) failed.
    #[error("metadata access failed for '{path}': {reason}")]
    MetadataAccess {
        /// Reference path or directory involved.
        path: String,
        /// Backend-provided detail.
        reason: String,
    },

    /// An object deletion failed for a reason other than the object being absent.
    #[error("object store failure on '{object}': {reason}")]
    ObjectStore {
        /// Object name.
        object: String,
        /// Backend-provided detail.
        reason: String,
    },

    /// A stream's persisted state cannot be interpreted.
    #[error("corrupt state at '{path}': {reason}")]
    CorruptState {
        /// Reference path carrying the bad state.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A reclamation range violates its ordering constraints.
    #[error("invalid gc range: {0}")]
    InvalidRange(String),

    /// A namespace's scan pool stopped because a worker hit a fatal error.
    #[error("scan pool aborted: {0}")]
    PoolAborted(String),

    /// The explicitly requested namespace does not exist.
    #[error("namespace '{0}' not found")]
    NamespaceNotFound(String),

    /// Rank-to-rank messaging failed.
    #[error("rank communication failed: {0}")]
    Comm(String),

    /// Configuration is unreadable or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A reference-directory ring could not be built.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// Local I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RmanError {
    pub(crate) fn metadata(path: impl Into<String>, reason: impl ToString) -> Self {
        RmanError::MetadataAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<String>, reason: impl ToString) -> Self {
        RmanError::CorruptState {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error only invalidates the stream being walked.
    ///
    /// Such errors are logged and the stream skipped; anything else aborts the
    /// namespace's scan pool.
    pub fn is_stream_local(&self) -> bool {
        matches!(self, RmanError::CorruptState { .. } | RmanError::InvalidRange(_))
    }
}
