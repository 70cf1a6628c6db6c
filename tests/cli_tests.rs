//! CLI tests: run the `keyhop` binary against a temporary home.
//!
//! `HOME` points at a temp dir and `SSH_AUTH_SOCK` is cleared, so the real
//! SSH config, registry and agent are never touched.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const TWO_ACCOUNTS: &str = "\
Host gitlab-personal
    HostName gitlab.com
    User git
    IdentityFile ~/keys/id_personal

Host gitlab-work
    HostName gitlab.com
    User git
    IdentityFile ~/keys/id_work
";

/// Runs the binary with `home` as `HOME` and the SSH config under it.
fn keyhop(home: &Path, args: &[&str]) -> Output {
    let config = home.join(".ssh").join("config");
    let settings = home.join(".keyhop").join("keyhoprc");
    Command::new(env!("CARGO_BIN_EXE_keyhop"))
        .arg("--settings")
        .arg(&settings)
        .arg("--config")
        .arg(&config)
        .args(args)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("SSH_AUTH_SOCK")
        .env_remove("RUST_LOG")
        .output()
        .expect("run keyhop")
}

fn home_with_two_accounts() -> TempDir {
    let home = TempDir::new().expect("temp home");
    fs::create_dir_all(home.path().join(".ssh")).expect("mkdir .ssh");
    fs::create_dir_all(home.path().join("keys")).expect("mkdir keys");
    fs::write(home.path().join(".ssh/config"), TWO_ACCOUNTS).expect("write config");
    fs::write(home.path().join("keys/id_personal"), "p").expect("write key");
    fs::write(home.path().join("keys/id_work"), "w").expect("write key");
    home
}

// ============================================================================
// Basics
// ============================================================================

/// Test: `--version` prints the package name.
#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_keyhop"))
        .arg("--version")
        .output()
        .expect("run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("keyhop"), "Should contain 'keyhop': {}", stdout);
    assert!(output.status.success());
}

/// Test: a missing subcommand is a usage error.
#[test]
fn test_cli_requires_subcommand() {
    let home = TempDir::new().expect("temp home");
    let output = keyhop(home.path(), &[]);
    assert_eq!(output.status.code(), Some(2));
}

/// Test: the first run writes a commented settings file.
#[test]
fn test_cli_creates_settings_file() {
    let home = TempDir::new().expect("temp home");
    let output = keyhop(home.path(), &["list-hosts"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let settings = fs::read_to_string(home.path().join(".keyhop/keyhoprc")).expect("settings");
    assert!(settings.contains("default_algorithm"));
}

// ============================================================================
// Hosts
// ============================================================================

/// Test: `list-hosts --json` reports aliases in file order.
#[test]
fn test_cli_list_hosts_json() {
    let home = home_with_two_accounts();
    let output = keyhop(home.path(), &["list-hosts", "--json"]);

    assert!(output.status.success());
    let hosts: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(hosts[0]["alias"], "gitlab-personal");
    assert_eq!(hosts[1]["alias"], "gitlab-work");
    assert_eq!(hosts[1]["identity_file"], "~/keys/id_work");
}

/// Test: adding an existing alias exits 11 and leaves the file alone.
#[test]
fn test_cli_duplicate_alias_exit_code() {
    let home = home_with_two_accounts();
    let key = home.path().join("keys/id_work");
    let output = keyhop(
        home.path(),
        &[
            "add-host",
            "gitlab-work",
            "--hostname",
            "gitlab.com",
            "--identity-file",
            &key.to_string_lossy(),
        ],
    );

    assert_eq!(output.status.code(), Some(11));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gitlab-work"), "stderr: {}", stderr);
    assert_eq!(
        fs::read_to_string(home.path().join(".ssh/config")).expect("config"),
        TWO_ACCOUNTS
    );
}

/// Test: `-o` values reach the config file.
#[test]
fn test_cli_add_host_with_option() {
    let home = home_with_two_accounts();
    let key = home.path().join("keys/id_work");
    let output = keyhop(
        home.path(),
        &[
            "add-host",
            "corp",
            "--hostname",
            "git.corp.example",
            "--identity-file",
            &key.to_string_lossy(),
            "-o",
            "Port=2222",
        ],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = fs::read_to_string(home.path().join(".ssh/config")).expect("config");
    assert!(text.starts_with(TWO_ACCOUNTS));
    assert!(text.contains("\nHost corp\n    HostName git.corp.example\n"));
    assert!(text.contains("    IdentityFile ~/keys/id_work\n"));
    assert!(text.ends_with("    Port 2222\n"), "config: {}", text);
}

/// Test: removing an unknown alias exits 17.
#[test]
fn test_cli_remove_unknown_host() {
    let home = home_with_two_accounts();
    let output = keyhop(home.path(), &["remove-host", "nope"]);
    assert_eq!(output.status.code(), Some(17));
}

/// Test: a malformed config exits 10 with the line number.
#[test]
fn test_cli_parse_error_exit_code() {
    let home = TempDir::new().expect("temp home");
    fs::create_dir_all(home.path().join(".ssh")).expect("mkdir");
    fs::write(home.path().join(".ssh/config"), "Host\n").expect("write");

    let output = keyhop(home.path(), &["list-hosts"]);
    assert_eq!(output.status.code(), Some(10));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 1"), "stderr: {}", stderr);
}

// ============================================================================
// Agent
// ============================================================================

/// Test: without an agent, `agent-add` exits 14 with a hint.
#[test]
fn test_cli_agent_unavailable() {
    let home = home_with_two_accounts();
    let key = home.path().join("keys/id_work");
    let output = keyhop(home.path(), &["agent-add", &key.to_string_lossy()]);

    assert_eq!(output.status.code(), Some(14));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("hint:"), "stderr: {}", stderr);
    assert_eq!(
        fs::read_to_string(home.path().join(".ssh/config")).expect("config"),
        TWO_ACCOUNTS
    );
}
