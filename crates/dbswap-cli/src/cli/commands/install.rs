//! Install command: stream a local file (or stdin) into place through a
//! `DatabaseWriter`.

use anyhow::{Context, Result};
use dbswap_core::checksum;
use dbswap_core::config::DbswapConfig;
use dbswap_core::lock::LockPatience;
use dbswap_core::{Committed, DatabaseWriter, VersionMode};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::cli::InstallArgs;

/// What `run_install` did.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InstallOutcome {
    /// Installed database already matched the expected hash.
    Unchanged,
    Installed(Committed),
}

/// Install `args.source` at `args.target`, printing the committed path.
pub fn run_install(cfg: &DbswapConfig, args: &InstallArgs) -> Result<()> {
    match install(cfg, args)? {
        InstallOutcome::Unchanged => {
            println!("{} is up to date", resolve_target(cfg, &args.target).display())
        }
        InstallOutcome::Installed(committed) => println!("{}", committed.path.display()),
    }
    Ok(())
}

pub(crate) fn install(cfg: &DbswapConfig, args: &InstallArgs) -> Result<InstallOutcome> {
    let target = resolve_target(cfg, &args.target);
    let lock = args.lock.clone().unwrap_or_else(|| cfg.lock_path());

    let mut options = cfg.writer_options();
    if args.unversioned {
        options.version_mode = VersionMode::Unversioned;
    }
    if args.fail_fast {
        options.lock_patience = LockPatience::FailFast;
    }

    let mut writer = DatabaseWriter::new(&target, &lock, options)
        .with_context(|| format!("cannot open writer for {}", target.display()))?;

    if args.skip_unchanged {
        if let Some(expected) = &args.sha256 {
            if checksum::hashes_match(writer.baseline_hash(), expected) {
                tracing::info!(path = %target.display(), "database unchanged, skipping");
                writer.close()?;
                return Ok(InstallOutcome::Unchanged);
            }
        }
    }

    let copied = copy_source(&args.source, &mut writer)?;
    tracing::debug!(bytes = copied, source = %args.source.display(), "staged new database");

    if let Some(expected) = &args.sha256 {
        writer.verify(expected)?;
    }
    if let Some(last_modified) = args.last_modified {
        if options.version_mode == VersionMode::Versioned {
            writer.use_versioned_path(last_modified)?;
        }
        writer.set_modification_time(last_modified)?;
    }

    let committed = writer.commit()?;
    writer.close()?;
    Ok(InstallOutcome::Installed(committed))
}

fn resolve_target(cfg: &DbswapConfig, target: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        cfg.database_directory.join(target)
    }
}

fn copy_source(source: &Path, writer: &mut DatabaseWriter) -> Result<u64> {
    let copied = if source == Path::new("-") {
        io::copy(&mut io::stdin().lock(), writer).context("cannot read stdin")?
    } else {
        let mut f = File::open(source).with_context(|| format!("open {}", source.display()))?;
        io::copy(&mut f, writer).with_context(|| format!("copy {}", source.display()))?
    };
    writer.flush()?;
    Ok(copied)
}
