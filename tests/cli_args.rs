//! Integration tests for the golook binary
//!
//! Each test points the binary at its own temporary data and cache
//! directories and an explicit config file.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use golook::cache::CacheManager;
use golook::data::KeyRecord;

/// Sources that refuse connections, so a spawned worker fails fast
const CONFIG: &str = r#"
[links]
url = "http://127.0.0.1:9/.export"
freshness_secs = 5

[keys]
url = "http://127.0.0.1:9/keys"
freshness_secs = 86400

[icons]
enabled = false
"#;

/// Helper to run the CLI with given args and capture output
fn run_cli(dir: &Path, args: &[&str]) -> std::process::Output {
    let config = dir.join("config.toml");
    fs::write(&config, CONFIG).expect("Failed to write config");

    Command::new(env!("CARGO_BIN_EXE_golook"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .env("GOLOOK_DATA_DIR", dir.join("data"))
        .env("GOLOOK_CACHE_DIR", dir.join("cache"))
        .env_remove("GOLOOK_KEYS_URL")
        .env_remove("GOLOOK_LINKS_URL")
        .output()
        .expect("Failed to execute golook")
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be a JSON document")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = Command::new(env!("CARGO_BIN_EXE_golook"))
        .arg("--help")
        .output()
        .expect("Failed to execute golook");
    assert!(output.status.success(), "Expected --help to exit successfully");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("golook"));
    assert!(stdout.contains("links"));
    assert!(stdout.contains("keys"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_golook"))
        .arg("snippets")
        .output()
        .expect("Failed to execute golook");
    assert!(!output.status.success());
}

#[test]
fn test_fresh_cache_is_served_and_filtered() {
    let temp_dir = TempDir::new().unwrap();
    let store = CacheManager::with_dir(temp_dir.path().join("data"));
    store
        .write(
            "pubkey-cache",
            &vec![
                KeyRecord {
                    key_line: "ssh-ed25519 AAAA ana@laptop".to_string(),
                    comment: "ana@laptop".to_string(),
                },
                KeyRecord {
                    key_line: "ssh-ed25519 BBBB bo@desktop".to_string(),
                    comment: "bo@desktop".to_string(),
                },
            ],
        )
        .unwrap();

    let output = run_cli(temp_dir.path(), &["keys", "laptop"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert!(json.get("rerun").is_none(), "fresh cache needs no rerun");
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "ana@laptop");
    assert_eq!(items[0]["arg"], "ssh-ed25519 AAAA ana@laptop");
}

#[test]
fn test_empty_cache_reports_pending_refresh() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_cli(temp_dir.path(), &["keys"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["rerun"], 0.2);
    assert_eq!(json["items"][0]["title"], "Refreshing data...");
    assert_eq!(json["items"][0]["valid"], false);
    assert!(temp_dir.path().join("cache").join("jobs").is_dir());
}

#[test]
fn test_corrupt_cache_fails_with_error_item() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("data")).unwrap();
    fs::write(temp_dir.path().join("data").join("pubkey-cache.json"), "garbage").unwrap();

    let output = run_cli(temp_dir.path(), &["keys"]);

    assert!(!output.status.success());
    let json = stdout_json(&output);
    let title = json["items"][0]["title"].as_str().unwrap();
    assert!(title.contains("error getting keys"), "unexpected title: {title}");
}

#[test]
fn test_failed_download_worker_exits_nonzero_and_keeps_cache() {
    let temp_dir = TempDir::new().unwrap();
    let store = CacheManager::with_dir(temp_dir.path().join("data"));
    let previous = vec![KeyRecord {
        key_line: "ssh-ed25519 AAAA old".to_string(),
        comment: "old".to_string(),
    }];
    store.write("pubkey-cache", &previous).unwrap();

    let output = run_cli(temp_dir.path(), &["keys", "--download"]);

    assert!(!output.status.success());
    let cached = store.read::<Vec<KeyRecord>>("pubkey-cache").unwrap();
    assert_eq!(cached.data, previous);
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use golook::cli::{Cli, Command};

    #[test]
    fn test_cli_links_query() {
        let cli = Cli::parse_from(["golook", "links", "docs"]);
        match cli.command {
            Command::Links(args) => assert_eq!(args.query, "docs"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_keys_flags() {
        let cli = Cli::parse_from(["golook", "keys", "--refresh", "--download"]);
        let args = cli.command.args();
        assert!(args.refresh);
        assert!(args.download);
    }
}
