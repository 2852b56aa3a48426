//! CLI for dbswap.

mod commands;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dbswap_core::config;
use std::path::PathBuf;

use commands::{run_completions, run_hash, run_install};

/// Top-level CLI for dbswap.
#[derive(Debug, Parser)]
#[command(name = "dbswap")]
#[command(
    about = "dbswap: locked, verified, atomic replacement of database files",
    long_about = None
)]
pub struct Cli {
    /// Config file to use instead of ~/.config/dbswap/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Install a new version of a database file from SOURCE.
    Install(InstallArgs),

    /// Print the SHA-256 of the database currently at PATH (zeros if absent).
    Hash {
        /// Database path (symlinks are followed).
        path: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// File with the new content, or `-` for stdin.
    pub source: PathBuf,

    /// Database path consumers read. Relative paths are resolved against the
    /// configured database directory.
    #[arg(long, value_name = "PATH")]
    pub target: PathBuf,

    /// Lock file (default: from config, `<database_directory>/.dbswap.lock`).
    #[arg(long, value_name = "PATH")]
    pub lock: Option<PathBuf>,

    /// Expected SHA-256 of SOURCE (hex, any case).
    #[arg(long, value_name = "HEX", value_parser = parse_sha256)]
    pub sha256: Option<String>,

    /// Last-modified time of the source (HTTP date or RFC 3339). Selects the
    /// versioned file name and becomes the file's mtime.
    #[arg(long, value_name = "TIME", value_parser = parse_last_modified)]
    pub last_modified: Option<DateTime<Utc>>,

    /// Write the target in place instead of a versioned file plus symlink.
    #[arg(long)]
    pub unversioned: bool,

    /// Fail immediately if another writer holds the lock.
    #[arg(long)]
    pub fail_fast: bool,

    /// Do nothing if the installed database already has the expected hash.
    #[arg(long, requires = "sha256")]
    pub skip_unchanged: bool,
}

/// Trims pasted whitespace and checks for 64 hex digits.
pub(crate) fn parse_sha256(s: &str) -> Result<String, String> {
    let s = s.trim();
    if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(s.to_string())
    } else {
        Err("expected 64 hex digits".to_string())
    }
}

/// Accepts `Tue, 17 Dec 2019 20:05:49 GMT` as well as `2019-12-17T20:05:49Z`.
pub(crate) fn parse_last_modified(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an HTTP date or RFC 3339 time: {}", e))
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Install(args) => {
                let cfg = match &cli.config {
                    Some(path) => config::load_from(path)?,
                    None => config::load_or_init()?,
                };
                tracing::debug!("loaded config: {:?}", cfg);
                run_install(&cfg, &args)?;
            }
            CliCommand::Hash { path } => run_hash(&path)?,
            CliCommand::Completions { shell } => run_completions(shell),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
