//! Moving a staged file into place.
//!
//! Staged (or Verified) → Synced → Renamed → Linked → Committed. Any failed
//! step moves the writer to Aborted and nothing after it runs. A failure after
//! the rename leaves the new file durably in place with the stable link still
//! pointing at the previous version; that is not rolled back.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{link_temporary_path, parent_dir, sync_dir, StagingSink};
use crate::checksum;
use crate::error::WriterError;

/// Where a writer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// Accepting writes into the staging file.
    Staged,
    /// Staged bytes matched the expected hash; no further writes.
    Verified,
    /// Staging file flushed and closed.
    Synced,
    /// Staging file renamed to its final name.
    Renamed,
    /// Stable symlink points at the new version.
    Linked,
    Committed,
    Aborted,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitState::Staged => "staged",
            CommitState::Verified => "verified",
            CommitState::Synced => "synced",
            CommitState::Renamed => "renamed",
            CommitState::Linked => "linked",
            CommitState::Committed => "committed",
            CommitState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Commit step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    SyncTemporary,
    Rename,
    SyncDirectory,
    Link,
}

impl fmt::Display for CommitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitStep::SyncTemporary => "sync-temporary",
            CommitStep::Rename => "rename",
            CommitStep::SyncDirectory => "sync-directory",
            CommitStep::Link => "link",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// File now holding the new content.
    pub path: PathBuf,
    /// Stable link repointed at `path`, in versioned mode.
    pub symlink: Option<PathBuf>,
    /// SHA-256 of the committed content.
    pub hash: String,
    pub bytes: u64,
}

/// Move `sink` into place at `destination`. When `destination` differs from
/// `target`, `target` becomes a relative symlink to it.
///
/// A versioned `destination` that already exists is never overwritten. If it
/// holds the same content the staging file is dropped and the link repointed;
/// otherwise the commit fails at the rename step.
pub(crate) fn run(
    sink: StagingSink,
    target: &Path,
    destination: &Path,
    state: &mut CommitState,
) -> Result<Committed, WriterError> {
    let temp = sink.path().to_path_buf();
    let bytes = sink.bytes_written();
    let dir = parent_dir(destination).to_path_buf();

    let hash = sink
        .finish()
        .map_err(|e| abort(state, CommitStep::SyncTemporary, &temp, e))?;
    *state = CommitState::Synced;
    tracing::debug!(path = %temp.display(), bytes, "synced staging file");

    let versioned = destination != target;
    let reused = versioned
        && reuse_existing_version(&temp, destination, &hash)
            .map_err(|e| abort(state, CommitStep::Rename, destination, e))?;
    if !reused {
        fs::rename(&temp, destination)
            .map_err(|e| abort(state, CommitStep::Rename, destination, e))?;
    }
    *state = CommitState::Renamed;

    sync_dir(&dir).map_err(|e| abort(state, CommitStep::SyncDirectory, &dir, e))?;
    tracing::debug!(
        from = %temp.display(),
        to = %destination.display(),
        reused,
        "moved database into place"
    );

    let symlink = if versioned {
        point_symlink(target, destination)
            .map_err(|e| abort(state, CommitStep::Link, target, e))?;
        sync_dir(&dir).map_err(|e| abort(state, CommitStep::SyncDirectory, &dir, e))?;
        *state = CommitState::Linked;
        tracing::debug!(link = %target.display(), to = %destination.display(), "repointed symlink");
        Some(target.to_path_buf())
    } else {
        None
    };

    *state = CommitState::Committed;
    Ok(Committed {
        path: destination.to_path_buf(),
        symlink,
        hash,
        bytes,
    })
}

fn abort(state: &mut CommitState, step: CommitStep, path: &Path, source: io::Error) -> WriterError {
    *state = CommitState::Aborted;
    WriterError::Commit {
        step,
        path: path.to_path_buf(),
        source,
    }
}

/// Ok(true) when `destination` already holds content hashing to `hash`; the
/// staging file has then been removed. Ok(false) when `destination` is free.
fn reuse_existing_version(temp: &Path, destination: &Path, hash: &str) -> io::Result<bool> {
    match fs::symlink_metadata(destination) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }
    let existing = checksum::sha256_path(destination)?;
    if !checksum::hashes_match(&existing, hash) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("versioned file already exists with different content ({existing})"),
        ));
    }
    fs::remove_file(temp)?;
    tracing::debug!(path = %destination.display(), "versioned file already installed");
    Ok(true)
}

/// Replace whatever is at `link` with a symlink to `destination`'s file name.
///
/// The link is created beside `link` and renamed over it, so `link` never
/// disappears, even when it was a regular file before.
fn point_symlink(link: &Path, destination: &Path) -> io::Result<()> {
    let name = destination.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "versioned path has no file name")
    })?;
    let staging_link = link_temporary_path(link);
    match fs::remove_file(&staging_link) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    symlink(Path::new(name), &staging_link)?;
    if let Err(e) = fs::rename(&staging_link, link) {
        let _ = fs::remove_file(&staging_link);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(_original: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "versioned installs require a unix platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn staged(dir: &Path, data: &[u8]) -> StagingSink {
        let mut sink = StagingSink::create(&dir.join("City.mmdb.temporary")).unwrap();
        sink.write_all(data).unwrap();
        sink
    }

    #[test]
    fn in_place_commit_has_no_link() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("City.mmdb");
        let mut state = CommitState::Staged;

        let committed = run(staged(dir.path(), b"ABC"), &target, &target, &mut state).unwrap();
        assert_eq!(state, CommitState::Committed);
        assert_eq!(committed.path, target);
        assert!(committed.symlink.is_none());
        assert_eq!(committed.bytes, 3);
        assert_eq!(fs::read(&target).unwrap(), b"ABC");
        assert!(!fs::symlink_metadata(&target).unwrap().file_type().is_symlink());
    }

    #[test]
    fn link_replaces_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("City.mmdb");
        fs::write(&target, b"unversioned").unwrap();
        let destination = dir.path().join("City.mmdb-20191217T200549Z");
        let mut state = CommitState::Staged;

        run(staged(dir.path(), b"ABC"), &target, &destination, &mut state).unwrap();
        assert_eq!(state, CommitState::Committed);
        assert_eq!(
            fs::read_link(&target).unwrap(),
            PathBuf::from("City.mmdb-20191217T200549Z")
        );
        assert_eq!(fs::read(&target).unwrap(), b"ABC");
        assert!(!link_temporary_path(&target).exists());
    }

    #[test]
    fn link_failure_keeps_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("City.mmdb");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();
        let destination = dir.path().join("City.mmdb-20191217T200549Z");
        let mut state = CommitState::Staged;

        let err = run(staged(dir.path(), b"ABC"), &target, &destination, &mut state).unwrap_err();
        match err {
            WriterError::Commit { step, .. } => assert_eq!(step, CommitStep::Link),
            other => panic!("expected link failure, got {:?}", other),
        }
        assert_eq!(state, CommitState::Aborted);
        assert_eq!(fs::read(&destination).unwrap(), b"ABC");
        assert!(target.is_dir());
        assert!(!link_temporary_path(&target).exists());
    }

    #[test]
    fn rename_failure_aborts_before_link() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("City.mmdb");
        let destination = dir.path().join("missing-dir").join("City.mmdb-20191217T200549Z");
        let mut state = CommitState::Staged;

        let err = run(staged(dir.path(), b"ABC"), &target, &destination, &mut state).unwrap_err();
        match err {
            WriterError::Commit { step, path, .. } => {
                assert_eq!(step, CommitStep::Rename);
                assert_eq!(path, destination);
            }
            other => panic!("expected rename failure, got {:?}", other),
        }
        assert_eq!(state, CommitState::Aborted);
        assert!(fs::symlink_metadata(&target).is_err());
    }

    #[test]
    fn existing_version_with_other_content_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("City.mmdb");
        let destination = dir.path().join("City.mmdb-20191217T200549Z");
        fs::write(&destination, b"ABC").unwrap();
        let mut state = CommitState::Staged;

        let err = run(staged(dir.path(), b"XYZ"), &target, &destination, &mut state).unwrap_err();
        match err {
            WriterError::Commit { step, path, source } => {
                assert_eq!(step, CommitStep::Rename);
                assert_eq!(path, destination);
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("expected rename failure, got {:?}", other),
        }
        assert_eq!(state, CommitState::Aborted);
        assert_eq!(fs::read(&destination).unwrap(), b"ABC");
        assert!(fs::symlink_metadata(&target).is_err());
    }

    #[test]
    fn existing_version_with_same_content_is_relinked() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("City.mmdb");
        let destination = dir.path().join("City.mmdb-20191217T200549Z");
        fs::write(&destination, b"ABC").unwrap();
        let temp = dir.path().join("City.mmdb.temporary");
        let mut state = CommitState::Staged;

        let committed = run(staged(dir.path(), b"ABC"), &target, &destination, &mut state).unwrap();
        assert_eq!(state, CommitState::Committed);
        assert_eq!(committed.path, destination);
        assert_eq!(committed.bytes, 3);
        assert!(!temp.exists());
        assert_eq!(
            fs::read_link(&target).unwrap(),
            PathBuf::from("City.mmdb-20191217T200549Z")
        );
    }
}
