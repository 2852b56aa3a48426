//! CLI parse tests.

use super::{parse_last_modified, parse_sha256, Cli, CliCommand};
use chrono::{TimeZone, Utc};
use clap::Parser;
use std::path::{Path, PathBuf};

pub(super) fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_install_defaults() {
    match parse(&["dbswap", "install", "new.mmdb", "--target", "City.mmdb"]) {
        CliCommand::Install(args) => {
            assert_eq!(args.source, PathBuf::from("new.mmdb"));
            assert_eq!(args.target, PathBuf::from("City.mmdb"));
            assert!(args.lock.is_none());
            assert!(args.sha256.is_none());
            assert!(args.last_modified.is_none());
            assert!(!args.unversioned);
            assert!(!args.fail_fast);
            assert!(!args.skip_unchanged);
        }
        _ => panic!("expected Install"),
    }
}

#[test]
fn cli_parse_install_all_flags() {
    match parse(&[
        "dbswap",
        "install",
        "-",
        "--target",
        "/db/City.mmdb",
        "--lock",
        "/run/lock/geoip.lock",
        "--sha256",
        " B5D4045C3F466FA91FE2CC6ABE79232A1A57CDF104F7A26E716E0A1E2789DF78\n",
        "--last-modified",
        "Tue, 17 Dec 2019 20:05:49 GMT",
        "--unversioned",
        "--fail-fast",
        "--skip-unchanged",
    ]) {
        CliCommand::Install(args) => {
            assert_eq!(args.source, PathBuf::from("-"));
            assert_eq!(args.lock.as_deref(), Some(Path::new("/run/lock/geoip.lock")));
            assert_eq!(
                args.sha256.as_deref(),
                Some("B5D4045C3F466FA91FE2CC6ABE79232A1A57CDF104F7A26E716E0A1E2789DF78")
            );
            assert_eq!(
                args.last_modified,
                Some(Utc.with_ymd_and_hms(2019, 12, 17, 20, 5, 49).unwrap())
            );
            assert!(args.unversioned);
            assert!(args.fail_fast);
            assert!(args.skip_unchanged);
        }
        _ => panic!("expected Install with all flags"),
    }
}

#[test]
fn cli_skip_unchanged_requires_sha256() {
    let res = Cli::try_parse_from([
        "dbswap",
        "install",
        "new.mmdb",
        "--target",
        "City.mmdb",
        "--skip-unchanged",
    ]);
    assert!(res.is_err());
}

#[test]
fn cli_install_requires_target() {
    assert!(Cli::try_parse_from(["dbswap", "install", "new.mmdb"]).is_err());
}

#[test]
fn cli_parse_hash_with_global_config() {
    let cli = Cli::try_parse_from([
        "dbswap",
        "hash",
        "/db/City.mmdb",
        "--config",
        "/etc/dbswap.toml",
    ])
    .unwrap();
    assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/dbswap.toml")));
    match cli.command {
        CliCommand::Hash { path } => assert_eq!(path, PathBuf::from("/db/City.mmdb")),
        _ => panic!("expected Hash"),
    }
}

#[test]
fn cli_parse_completions() {
    match parse(&["dbswap", "completions", "bash"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, clap_complete::Shell::Bash),
        _ => panic!("expected Completions"),
    }
}

#[test]
fn last_modified_formats() {
    let expected = Utc.with_ymd_and_hms(2019, 12, 17, 20, 5, 49).unwrap();
    assert_eq!(parse_last_modified("Tue, 17 Dec 2019 20:05:49 GMT").unwrap(), expected);
    assert_eq!(parse_last_modified("2019-12-17T20:05:49Z").unwrap(), expected);
    assert_eq!(parse_last_modified("2019-12-17T21:05:49+01:00").unwrap(), expected);
    assert!(parse_last_modified("yesterday").is_err());
}

#[test]
fn sha256_argument_is_trimmed_and_checked() {
    let hex = "b5d4045c3f466fa91fe2cc6abe79232a1a57cdf104f7a26e716e0a1e2789df78";
    assert_eq!(parse_sha256(&format!("  {}\n", hex)).unwrap(), hex);
    assert!(parse_sha256("ABCDEF").is_err());
    assert!(parse_sha256(&format!("{}zz", &hex[..62])).is_err());
}
