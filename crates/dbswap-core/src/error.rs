//! Errors returned by [`DatabaseWriter`](crate::writer::DatabaseWriter).

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::lock::LockError;
use crate::storage::{CommitState, CommitStep};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Existing file could not be read (absence is not an error).
    #[error("error calculating hash of existing database {}: {source}", path.display())]
    BaselineHash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error writing staging file {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sha256 of new database ({actual}) does not match expected sha256 ({expected})")]
    HashMismatch { actual: String, expected: String },

    /// The new version may already be in place when `step` is `link` or a
    /// later `sync-directory`.
    #[error("commit failed at {step} ({}): {source}", path.display())]
    Commit {
        step: CommitStep,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error setting times on {}: {source}", path.display())]
    ModificationTime {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot derive versioned path: {reason}")]
    Versioning { reason: &'static str },

    #[error("cannot {operation} while writer is {state}")]
    InvalidState {
        operation: &'static str,
        state: CommitState,
    },

    #[error(transparent)]
    Close(#[from] CloseError),
}

/// One cleanup step that failed during close.
#[derive(Debug, thiserror::Error)]
pub enum CleanupFailure {
    #[error("error removing temporary file {}: {source}", path.display())]
    RemoveTemporary {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error releasing lock: {0}")]
    ReleaseLock(#[source] LockError),
}

/// Every cleanup step that failed, in the order they ran.
#[derive(Debug)]
pub struct CloseError {
    pub failures: Vec<CleanupFailure>,
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error closing database writer")?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}
