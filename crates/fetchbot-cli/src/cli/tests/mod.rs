//! CLI parse tests.

use super::{Cli, CliCommand};
use clap::Parser;

fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_fetch_defaults() {
    match parse(&["fetchbot", "fetch", "https://youtu.be/abc"]) {
        CliCommand::Fetch {
            url,
            identity,
            quality,
            items,
            destination,
        } => {
            assert_eq!(url, "https://youtu.be/abc");
            assert_eq!(quality, "best");
            assert_eq!(identity, "local");
            assert!(items.is_none());
            assert!(destination.is_none());
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_fetch_with_range_and_options() {
    match parse(&[
        "fetchbot",
        "fetch",
        "https://www.youtube.com/playlist?list=PL1",
        "-q",
        "720p",
        "--identity",
        "42",
        "--items",
        "2-5",
        "--destination",
        "group-1",
    ]) {
        CliCommand::Fetch {
            url,
            identity,
            quality,
            items,
            destination,
        } => {
            assert!(url.ends_with("PL1"));
            assert_eq!(quality, "720p");
            assert_eq!(identity, "42");
            assert_eq!(items.as_deref(), Some("2-5"));
            assert_eq!(destination.as_deref(), Some("group-1"));
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_serve() {
    match parse(&["fetchbot", "serve"]) {
        CliCommand::Serve { requests } => assert!(requests.is_none()),
        _ => panic!("expected Serve"),
    }
    match parse(&["fetchbot", "serve", "--requests", "/tmp/requests.jsonl"]) {
        CliCommand::Serve { requests } => {
            assert_eq!(requests.as_deref(), Some(std::path::Path::new("/tmp/requests.jsonl")))
        }
        _ => panic!("expected Serve with --requests"),
    }
}

#[test]
fn cli_parse_forget_item() {
    match parse(&["fetchbot", "forget", "https://youtu.be/abc", "--item", "3"]) {
        CliCommand::Forget { url, quality, item } => {
            assert_eq!(url, "https://youtu.be/abc");
            assert_eq!(quality, "best");
            assert_eq!(item, Some(3));
        }
        _ => panic!("expected Forget"),
    }
}

#[test]
fn cli_parse_history_and_global_db() {
    let cli = Cli::try_parse_from(["fetchbot", "history", "42", "--limit", "5", "--db", "/tmp/f.db"]).unwrap();
    assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/f.db")));
    match cli.command {
        CliCommand::History { identity, limit } => {
            assert_eq!(identity, "42");
            assert_eq!(limit, 5);
        }
        _ => panic!("expected History"),
    }
}

#[test]
fn cli_parse_lookup_requires_url() {
    assert!(Cli::try_parse_from(["fetchbot", "lookup"]).is_err());
    match parse(&["fetchbot", "lookup", "https://youtu.be/abc", "--quality", "audio"]) {
        CliCommand::Lookup { quality, items, .. } => {
            assert_eq!(quality, "audio");
            assert!(items.is_none());
        }
        _ => panic!("expected Lookup"),
    }
}

#[test]
fn explicit_items_override_url_suffix() {
    let request = super::parse_request("https://www.youtube.com/playlist?list=PL1", "720", Some("3-4"), 50).unwrap();
    assert_eq!(request.range.indices(), vec![3, 4]);
    let request = super::parse_request("https://www.youtube.com/playlist?list=PL1*1*2", "best", None, 50).unwrap();
    assert_eq!(request.range.indices(), vec![1, 2]);
    assert!(super::parse_request("https://youtu.be/abc", "tiny", None, 50).is_err());

    // The suffix is dropped from the URL even when --items wins.
    let both = super::parse_request("https://www.youtube.com/playlist?list=PL1*1*2", "best", Some("3-4"), 50).unwrap();
    let plain = super::parse_request("https://www.youtube.com/playlist?list=PL1", "best", Some("3-4"), 50).unwrap();
    assert_eq!(both.range.indices(), vec![3, 4]);
    assert_eq!(both.source_url, "https://www.youtube.com/playlist?list=PL1");
    assert_eq!(both.normalized_url, plain.normalized_url);
    assert_eq!(both.fingerprint(), plain.fingerprint());
}

#[test]
fn oversized_ranges_are_rejected() {
    let playlist = "https://www.youtube.com/playlist?list=PL1";
    assert!(super::parse_request(&format!("{playlist}*1*4000000000"), "best", None, 50).is_err());
    assert!(super::parse_request(playlist, "best", Some("1-4000000000"), 50).is_err());
    assert!(super::parse_request(playlist, "best", Some("1-51"), 50).is_err());
    assert!(super::parse_request(playlist, "best", Some("1-50"), 50).is_ok());
}
