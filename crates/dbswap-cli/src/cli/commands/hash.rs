//! Hash command: SHA-256 of the installed database.

use anyhow::{Context, Result};
use dbswap_core::checksum;
use std::path::Path;

/// Print the hash of whatever is at `path`, or the zero hash if nothing is.
pub fn run_hash(path: &Path) -> Result<()> {
    let digest = checksum::hash_existing(path)
        .with_context(|| format!("cannot hash {}", path.display()))?;
    println!("{}  {}", digest, path.display());
    Ok(())
}
