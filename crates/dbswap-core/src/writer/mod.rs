//! Locked, verified, atomic replacement of one database file.
//!
//! A [`DatabaseWriter`] takes the lock, records the hash of the installed
//! database, and stages incoming bytes next to it. Nothing a reader can see
//! changes until [`DatabaseWriter::commit`] renames the staged file into place.
//!
//! ```no_run
//! use dbswap_core::writer::{DatabaseWriter, WriterOptions};
//! use std::io::Write;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let body: &[u8] = b"";
//! # let expected_sha256 = "";
//! let mut writer = DatabaseWriter::new(
//!     "/usr/share/GeoIP/GeoLite2-City.mmdb",
//!     "/usr/share/GeoIP/.dbswap.lock",
//!     WriterOptions::default(),
//! )?;
//! writer.write_all(body)?;
//! writer.verify(expected_sha256)?;
//! writer.commit()?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::checksum;
use crate::error::{CleanupFailure, CloseError, WriterError};
use crate::lock::{FileLock, LockPatience};
use crate::storage::commit::{self, Committed};
use crate::storage::{self, CommitState, StagingSink};

/// Whether commits keep history under timestamped names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionMode {
    /// Commit to `<target>-<timestamp>` and point `<target>` at it. Without a
    /// timestamp the commit falls back to writing `<target>` directly.
    #[default]
    Versioned,
    /// Always commit to `<target>` itself.
    Unversioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WriterOptions {
    pub lock_patience: LockPatience,
    pub version_mode: VersionMode,
}

/// Single-use writer for one database file. See the module docs.
///
/// Dropping the writer without [`close`](DatabaseWriter::close) still removes
/// the staging file and releases the lock; failures are only logged then.
#[derive(Debug)]
pub struct DatabaseWriter {
    target: PathBuf,
    write_path: PathBuf,
    temp_path: PathBuf,
    options: WriterOptions,
    versioned: bool,
    lock: FileLock,
    baseline_hash: String,
    sink: Option<StagingSink>,
    state: CommitState,
    committed: Option<Committed>,
    closed: bool,
}

impl DatabaseWriter {
    /// Lock `lock_path`, hash the file currently at `target` and create the
    /// staging file. The lock is released again if any later step fails.
    pub fn new(
        target: impl AsRef<Path>,
        lock_path: impl AsRef<Path>,
        options: WriterOptions,
    ) -> Result<Self, WriterError> {
        let target = target.as_ref().to_path_buf();
        let lock = FileLock::acquire(lock_path.as_ref(), options.lock_patience)?;

        let baseline_hash =
            checksum::hash_existing(&target).map_err(|source| WriterError::BaselineHash {
                path: target.clone(),
                source,
            })?;

        let temp_path = storage::temporary_path(&target);
        let sink = StagingSink::create(&temp_path).map_err(|source| WriterError::Staging {
            path: temp_path.clone(),
            source,
        })?;

        tracing::debug!(
            database = %target.display(),
            lock = %lock.path().display(),
            baseline = %baseline_hash,
            "opened database writer"
        );

        Ok(DatabaseWriter {
            write_path: target.clone(),
            target,
            temp_path,
            options,
            versioned: false,
            lock,
            baseline_hash,
            sink: Some(sink),
            state: CommitState::Staged,
            committed: None,
            closed: false,
        })
    }

    /// Hash of the file that was at the target when the writer was opened, or
    /// [`checksum::ZERO_HASH`] if there was none.
    pub fn baseline_hash(&self) -> &str {
        &self.baseline_hash
    }

    /// Hash of everything written so far (or committed).
    pub fn running_hash(&self) -> Option<String> {
        match (&self.sink, &self.committed) {
            (Some(sink), _) => Some(sink.running_hash()),
            (None, Some(committed)) => Some(committed.hash.clone()),
            (None, None) => None,
        }
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    /// The stable path consumers read.
    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// Where the commit will put (or has put) the new content.
    pub fn write_path(&self) -> &Path {
        &self.write_path
    }

    pub fn temporary_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn version_mode(&self) -> VersionMode {
        self.options.version_mode
    }

    pub fn committed(&self) -> Option<&Committed> {
        self.committed.as_ref()
    }

    fn staged_sink(&mut self, operation: &'static str) -> Result<&mut StagingSink, WriterError> {
        match (self.state, self.sink.as_mut()) {
            (CommitState::Staged | CommitState::Verified, Some(sink)) => Ok(sink),
            (state, _) => Err(WriterError::InvalidState { operation, state }),
        }
    }

    /// Like `staged_sink`, but closed to writes once the content is verified.
    fn writable_sink(&mut self) -> Result<&mut StagingSink, WriterError> {
        match (self.state, self.sink.as_mut()) {
            (CommitState::Staged, Some(sink)) => Ok(sink),
            (state, _) => Err(WriterError::InvalidState {
                operation: "write",
                state,
            }),
        }
    }

    /// Compare the hash of the staged bytes with `expected` (hex, any case).
    ///
    /// A match freezes the staged content: later writes are rejected, so the
    /// commit installs exactly the verified bytes. A mismatch leaves the
    /// staging file for [`close`](Self::close) to remove and makes any later
    /// commit fail.
    pub fn verify(&mut self, expected: &str) -> Result<(), WriterError> {
        let actual = self.staged_sink("verify")?.running_hash();
        if checksum::hashes_match(&actual, expected) {
            self.state = CommitState::Verified;
            return Ok(());
        }
        self.state = CommitState::Aborted;
        Err(WriterError::HashMismatch {
            actual,
            expected: expected.to_string(),
        })
    }

    /// Commit under `<target>-<timestamp>` instead of `<target>`. May be
    /// called once, before commit.
    pub fn use_versioned_path(
        &mut self,
        last_modified: DateTime<Utc>,
    ) -> Result<&Path, WriterError> {
        self.staged_sink("derive versioned path")?;
        if self.options.version_mode == VersionMode::Unversioned {
            return Err(WriterError::Versioning {
                reason: "writer is in unversioned mode",
            });
        }
        if self.versioned {
            return Err(WriterError::Versioning {
                reason: "versioned path already derived",
            });
        }
        self.write_path = storage::versioned_path(&self.target, last_modified);
        self.versioned = true;
        tracing::debug!(path = %self.write_path.display(), "using versioned path");
        Ok(&self.write_path)
    }

    /// Set access and modification time of the new file to `last_modified`.
    ///
    /// Before commit this touches the staging file (the rename keeps the
    /// times), afterwards the committed file. Call it after the last write.
    pub fn set_modification_time(
        &mut self,
        last_modified: DateTime<Utc>,
    ) -> Result<(), WriterError> {
        let path = match self.state {
            CommitState::Staged | CommitState::Verified => self.temp_path.clone(),
            CommitState::Committed => self.write_path.clone(),
            state => {
                return Err(WriterError::InvalidState {
                    operation: "set modification time",
                    state,
                })
            }
        };
        let time = FileTime::from_unix_time(
            last_modified.timestamp(),
            last_modified.timestamp_subsec_nanos(),
        );
        filetime::set_file_times(&path, time, time)
            .map_err(|source| WriterError::ModificationTime { path, source })
    }

    /// Sync the staged file, rename it into place, sync the directory and, in
    /// versioned mode, repoint the stable symlink. Runs at most once.
    pub fn commit(&mut self) -> Result<Committed, WriterError> {
        self.staged_sink("commit")?;
        if self.options.version_mode == VersionMode::Versioned && !self.versioned {
            tracing::warn!(
                database = %self.target.display(),
                "no last-modified time supplied, writing database without a version suffix"
            );
        }
        let Some(sink) = self.sink.take() else {
            return Err(WriterError::InvalidState {
                operation: "commit",
                state: self.state,
            });
        };

        let committed = commit::run(sink, &self.target, &self.write_path, &mut self.state)?;
        tracing::info!(
            path = %committed.path.display(),
            hash = %committed.hash,
            bytes = committed.bytes,
            "committed database"
        );
        self.committed = Some(committed.clone());
        Ok(committed)
    }

    /// Close the staging file, remove it if it was not committed, and release
    /// the lock. Every step runs even if an earlier one fails. Idempotent.
    pub fn close(&mut self) -> Result<(), WriterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut failures = Vec::new();

        drop(self.sink.take());

        match fs::remove_file(&self.temp_path) {
            Ok(()) => tracing::debug!(path = %self.temp_path.display(), "removed staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => failures.push(CleanupFailure::RemoveTemporary {
                path: self.temp_path.clone(),
                source,
            }),
        }

        if let Err(e) = self.lock.release() {
            failures.push(CleanupFailure::ReleaseLock(e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseError { failures }.into())
        }
    }
}

impl Write for DatabaseWriter {
    /// Append to the staging file. Rejected after a successful verify.
    /// Anything but an interrupted write aborts the writer.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let sink = self.writable_sink().map_err(io::Error::other)?;
        match sink.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(source) => {
                self.state = CommitState::Aborted;
                let kind = source.kind();
                let err = WriterError::Staging {
                    path: self.temp_path.clone(),
                    source,
                };
                Err(io::Error::new(kind, err))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged_sink("flush").map_err(io::Error::other)?.flush()
    }
}

impl Drop for DatabaseWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("{}", e);
        }
    }
}
