//! Error taxonomy for the replication engine.
//!
//! Every fallible operation in this crate returns one of these variants.
//! Nothing in the core ever panics on bad input or a failed backend call;
//! callers are expected to match on the variant to decide whether a retry,
//! a `fix_consistency`, or an operator page is the right response.

use std::path::PathBuf;

use thiserror::Error;

/// Closed error enum for the replication engine (see spec §7).
#[derive(Debug, Error)]
pub enum Error {
    /// The backend reported failure on a specific primitive. The replica is
    /// left in whatever on-disk state it reached; the next
    /// `fix_consistency` is expected to restore invariants I1-I6.
    #[error("backend I/O failure during {op} on {path}: {source}")]
    BackendIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mutating operation was invoked outside the state that permits it.
    #[error("{op} requires state {expected:?}, replica is in {actual:?}")]
    StateViolation {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// `rename` (or an undo-log/meta-file rename-along-with-data) found an
    /// existing file at the destination.
    #[error("rename target already exists: {path}")]
    NameConflict { path: PathBuf },

    /// The metadata sidecar exists but failed to deserialize.
    #[error("corrupt metadata sidecar at {path}: {reason}")]
    CorruptMeta { path: PathBuf, reason: String },

    /// The undo log exists but failed to deserialize.
    #[error("corrupt undo log at {path}: {reason}")]
    CorruptUndo { path: PathBuf, reason: String },

    /// A malformed request: empty data for a non-zero-size write, a
    /// negative/overflowing id, a `block_size` of zero, or a read/write
    /// against a `Replica` opened with a `block_size` that disagrees with
    /// the one the replica was created with.
    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn backend_io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        log::warn!("backend I/O failure during {op} on {}: {source}", path.display());
        Error::BackendIo { op, path, source }
    }

    pub(crate) fn state_violation(op: &'static str, expected: &'static str, actual: &'static str) -> Self {
        log::warn!("state violation: {op} requires {expected}, found {actual}");
        Error::StateViolation { op, expected, actual }
    }

    pub(crate) fn name_conflict(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        log::warn!("rename target already exists: {}", path.display());
        Error::NameConflict { path }
    }

    pub(crate) fn corrupt_meta(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        let path = path.into();
        let reason = reason.into();
        log::error!("corrupt metadata sidecar at {}: {reason}", path.display());
        Error::CorruptMeta { path, reason }
    }

    pub(crate) fn corrupt_undo(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        let path = path.into();
        let reason = reason.into();
        log::error!("corrupt undo log at {}: {reason}", path.display());
        Error::CorruptUndo { path, reason }
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        let message = message.into();
        log::debug!("usage error: {message}");
        Error::Usage(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
