//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `conveyor` binary against configuration
//! files written to a temporary directory. Commands that need a live
//! system point at a closed local port, so they exercise the error path
//! without network access.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use tempfile::TempDir;

const CONFIG: &str = r##"
exclude_from_function_detection = ["logger.info"]

[[environment]]
id = 1
name = "Development"
color = "#40a040"

[[system]]
name = "dev"
description = "development box"
server = "dev.example.com"
user = "migrator"
password = "hunter2"
environment = 1

[[system]]
name = "prod"
server = "prod.example.com"
port = 9443
user = "migrator"
password_env = "CONVEYOR_CLI_TEST_NO_SUCH_VAR"
"##;

/// Helper: write `content` as the config file of a fresh temp dir.
fn config_file(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("conveyor.toml");
    fs::write(&path, content).expect("write config");
    (dir, path)
}

fn conveyor() -> Command {
    let mut cmd = cargo_bin_cmd!("conveyor");
    cmd.env_remove("CONVEYOR_LOG");
    cmd
}

/// A base URL nothing listens on.
fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);
    url
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    conveyor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate channels and code templates"));
}

#[test]
fn version_flag_exits_0() {
    conveyor()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("conveyor"));
}

#[test]
fn migrate_help_lists_template_option() {
    conveyor()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--with-templates"));
}

#[test]
fn migrate_without_components_is_a_usage_error() {
    conveyor()
        .args(["migrate", "dev", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

// ──────────────────────────────────────────────
// 2. Configuration errors
// ──────────────────────────────────────────────

#[test]
fn missing_config_file_exits_1() {
    let dir = TempDir::new().expect("temp dir");
    conveyor()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("systems")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("could not read"));
}

#[test]
fn invalid_config_reports_every_problem() {
    let (_dir, path) = config_file(
        r#"
[[system]]
name = "a"
server = ""
user = "u"
environment = 3

[[system]]
name = "a"
server = "x"
user = "u"
"#,
    );
    conveyor()
        .arg("--config")
        .arg(&path)
        .arg("systems")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("has no server"))
        .stderr(predicate::str::contains("unknown environment 3"))
        .stderr(predicate::str::contains("defined more than once"));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let (_dir, path) = config_file("[[system]\nname = ");
    conveyor()
        .arg("--config")
        .arg(&path)
        .arg("systems")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("could not parse"));
}

#[test]
fn json_errors_are_json_on_stderr() {
    let (_dir, path) = config_file(CONFIG);
    let assert = conveyor()
        .arg("--config")
        .arg(&path)
        .args(["--output", "json", "version", "qa"])
        .assert()
        .code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    let last = stderr.lines().last().expect("an error line");
    let value: serde_json::Value = serde_json::from_str(last).expect("json error");
    assert_eq!(value["error"], "no system named 'qa' in the configuration");
}

// ──────────────────────────────────────────────
// 3. Systems listing
// ──────────────────────────────────────────────

#[test]
fn systems_lists_names_urls_and_environments() {
    let (_dir, path) = config_file(CONFIG);
    conveyor()
        .arg("--config")
        .arg(&path)
        .arg("systems")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "dev [Development]  https://dev.example.com:8443  development box",
        ))
        .stdout(predicate::str::contains("prod  https://prod.example.com:9443"));
}

#[test]
fn systems_json_omits_credentials() {
    let (_dir, path) = config_file(CONFIG);
    let assert = conveyor()
        .arg("--config")
        .arg(&path)
        .args(["--output", "json", "systems"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(value[0]["name"], "dev");
    assert_eq!(value[0]["environment"], "Development");
    assert!(value[1].get("environment").is_none());
}

// ──────────────────────────────────────────────
// 4. Commands needing a system
// ──────────────────────────────────────────────

#[test]
fn missing_password_is_reported_before_connecting() {
    let (_dir, path) = config_file(CONFIG);
    conveyor()
        .arg("--config")
        .arg(&path)
        .args(["list", "prod"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no password for system 'prod'"));
}

#[test]
fn malformed_component_is_rejected() {
    let (_dir, path) = config_file(CONFIG);
    conveyor()
        .arg("--config")
        .arg(&path)
        .args(["detail", "dev", "widget:1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid component 'widget:1'"));
}

#[test]
fn unreachable_system_is_unavailable() {
    let config = format!(
        "[[system]]\nname = \"down\"\nserver = \"{}\"\nuser = \"u\"\npassword = \"p\"\nconnect_timeout_secs = 2\n",
        closed_port_url()
    );
    let (_dir, path) = config_file(&config);
    conveyor()
        .arg("--config")
        .arg(&path)
        .args(["--quiet", "version", "down"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());

    conveyor()
        .arg("--config")
        .arg(&path)
        .args(["version", "down"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("system 'down'"))
        .stderr(predicate::str::contains("unavailable"));
}

#[test]
fn migrating_onto_the_same_system_is_refused() {
    let config = format!(
        "[[system]]\nname = \"down\"\nserver = \"{}\"\nuser = \"u\"\npassword = \"p\"\n",
        closed_port_url()
    );
    let (_dir, path) = config_file(&config);
    conveyor()
        .arg("--config")
        .arg(&path)
        .args(["migrate", "down", "down", "channel:p1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must be different systems"));
}
