//! Disk layout and durability helpers for database files.
//!
//! Incoming bytes are staged in `<target>.temporary` next to the target, then
//! renamed into place under either the target name or a versioned name
//! (`<target>-YYYYMMDDThhmmssZ`). In versioned mode the target itself becomes a
//! relative symlink to the newest version.

pub mod commit;
mod staging;

pub use commit::{CommitState, CommitStep};
pub use staging::StagingSink;

use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix of the staging file.
pub const TEMP_SUFFIX: &str = ".temporary";

/// Suffix of the link created next to the target before it is renamed over it.
pub const LINK_TEMP_SUFFIX: &str = ".symlink.temporary";

/// chrono format of the version suffix (UTC, e.g. `20191217T200549Z`).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut o: OsString = path.as_os_str().to_owned();
    o.push(suffix);
    PathBuf::from(o)
}

/// Path of the staging file: `City.mmdb` → `City.mmdb.temporary`.
pub fn temporary_path(target: &Path) -> PathBuf {
    with_suffix(target, TEMP_SUFFIX)
}

pub(crate) fn link_temporary_path(target: &Path) -> PathBuf {
    with_suffix(target, LINK_TEMP_SUFFIX)
}

/// Versioned file name for a source last modified at `last_modified`:
/// `City.mmdb` → `City.mmdb-20191217T200549Z`.
pub fn versioned_path(target: &Path, last_modified: DateTime<Utc>) -> PathBuf {
    let suffix = format!("-{}", last_modified.format(TIMESTAMP_FORMAT));
    with_suffix(target, &suffix)
}

/// Directory holding `path`; `.` for a bare file name.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// fsync a directory so renames and new entries in it survive a crash.
///
/// Filesystems that cannot sync directories report `EINVAL` or `ENOTSUP`;
/// that is treated as success. Failing to open the directory is an error.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    let handle = File::open(dir)?;
    match handle.sync_all() {
        Ok(()) => Ok(()),
        Err(e) if sync_unsupported(&e) => {
            tracing::debug!(
                dir = %dir.display(),
                error = %e,
                "directory sync not supported, skipping"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn sync_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }
    #[cfg(unix)]
    {
        // ENOTSUP and EOPNOTSUPP share a value on Linux but not everywhere.
        matches!(err.raw_os_error(), Some(code)
            if code == libc::EINVAL || code == libc::ENOTSUP || code == libc::EOPNOTSUPP)
    }
    #[cfg(not(unix))]
    {
        false
    }
}
