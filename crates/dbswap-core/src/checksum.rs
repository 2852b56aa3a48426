//! SHA-256 content hashes for existing and staged database files.
//!
//! Hashes are lowercase hex. A missing file hashes to [`ZERO_HASH`] so callers
//! can compare "what is installed" against "what the server offers" without
//! special-casing first installs.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Sentinel hash for "no file present".
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash everything `reader` yields. Reads in chunks to keep memory use bounded.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(&hasher))
}

/// Compute SHA-256 of a file. Fails if the file does not exist.
pub fn sha256_path(path: &Path) -> io::Result<String> {
    let f = File::open(path)?;
    sha256_reader(f)
}

/// Hash of whatever currently sits at `path`, or [`ZERO_HASH`] if nothing does.
///
/// Symlinks are followed, so for a versioned install this is the hash of the
/// version the stable link points at.
pub fn hash_existing(path: &Path) -> io::Result<String> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ZERO_HASH.to_string()),
        Err(e) => return Err(e),
    };
    let digest = sha256_reader(f)?;
    tracing::debug!(path = %path.display(), hash = %digest, "calculated existing file hash");
    Ok(digest)
}

/// Hex digest of the bytes fed to `hasher` so far, leaving it usable.
pub fn hex_digest(hasher: &Sha256) -> String {
    hex::encode(hasher.clone().finalize())
}

/// Case-insensitive comparison of two hex digests. Surrounding whitespace is
/// a mismatch.
pub fn hashes_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}
