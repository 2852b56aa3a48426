//! Staging file that hashes everything written to it.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::checksum;

/// Sequential sink backed by the staging file. Every byte the file accepts is
/// also folded into the running SHA-256, so the reported hash always matches
/// what is on disk.
pub struct StagingSink {
    file: File,
    path: PathBuf,
    hasher: Sha256,
    bytes_written: u64,
}

impl StagingSink {
    /// Create the staging file at `path` (e.g. `City.mmdb.temporary`).
    /// Truncates whatever a previous, interrupted run left behind.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut options = File::options();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path)?;
        Ok(StagingSink {
            file,
            path: path.to_path_buf(),
            hasher: Sha256::new(),
            bytes_written: 0,
        })
    }

    /// Hex SHA-256 of the bytes written so far.
    pub fn running_hash(&self) -> String {
        checksum::hex_digest(&self.hasher)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the file's data to storage and close it. Returns the final hash.
    pub fn finish(self) -> io::Result<String> {
        self.file.sync_all()?;
        let hash = self.running_hash();
        drop(self.file);
        Ok(hash)
    }
}

impl fmt::Debug for StagingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingSink")
            .field("path", &self.path)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl Write for StagingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
