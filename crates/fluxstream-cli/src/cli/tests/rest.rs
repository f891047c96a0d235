//! Tests for status, list, stream, delete, recover, checksum, completions.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

#[test]
fn cli_parse_status() {
    match parse(&["fluxstream", "status", "abcd1234"]) {
        CliCommand::Status { id } => assert_eq!(id, "abcd1234"),
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_list() {
    assert!(matches!(parse(&["fluxstream", "list"]), CliCommand::List));
}

#[test]
fn cli_parse_stream_to_stdout() {
    match parse(&["fluxstream", "stream", "abcd1234"]) {
        CliCommand::Stream { id, out } => {
            assert_eq!(id, "abcd1234");
            assert!(out.is_none());
        }
        _ => panic!("expected Stream"),
    }
}

#[test]
fn cli_parse_stream_to_file() {
    match parse(&["fluxstream", "stream", "abcd1234", "-o", "/tmp/out.mkv"]) {
        CliCommand::Stream { out, .. } => {
            assert_eq!(out.as_deref(), Some(std::path::Path::new("/tmp/out.mkv")));
        }
        _ => panic!("expected Stream with --out"),
    }
}

#[test]
fn cli_parse_delete_and_restore() {
    match parse(&["fluxstream", "delete", "abcd1234"]) {
        CliCommand::Delete { id, restore } => {
            assert_eq!(id, "abcd1234");
            assert!(!restore);
        }
        _ => panic!("expected Delete"),
    }
    match parse(&["fluxstream", "delete", "abcd1234", "--restore"]) {
        CliCommand::Delete { restore, .. } => assert!(restore),
        _ => panic!("expected Delete with --restore"),
    }
}

#[test]
fn cli_parse_recover() {
    assert!(matches!(parse(&["fluxstream", "recover"]), CliCommand::Recover));
}

#[test]
fn cli_parse_checksum() {
    match parse(&["fluxstream", "checksum", "/tmp/f.bin", "--verify", "abc123"]) {
        CliCommand::Checksum { path, verify } => {
            assert_eq!(path, std::path::PathBuf::from("/tmp/f.bin"));
            assert_eq!(verify.as_deref(), Some("abc123"));
        }
        _ => panic!("expected Checksum"),
    }
}

#[test]
fn cli_parse_completions() {
    match parse(&["fluxstream", "completions", "bash"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, Shell::Bash),
        _ => panic!("expected Completions"),
    }
    assert!(Cli::try_parse_from(["fluxstream", "completions", "cmd.exe"]).is_err());
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn unknown_subcommand_is_an_error() {
    assert!(Cli::try_parse_from(["fluxstream", "pause", "1"]).is_err());
}
