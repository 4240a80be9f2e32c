//! Integration tests for the `deconz` CLI binary.
//!
//! Argument parsing, help output, completions and error exits run without a
//! gateway; the device commands run against a wiremock REST gateway.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

const KEY: &str = "0A1B2C3D4E";

/// Build a [`Command`] for the `deconz` binary with env isolation.
///
/// Clears all `DECONZ_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn deconz_cmd() -> assert_cmd::Command {
    deconz_cmd_in(Path::new("/tmp/deconz-cli-test-nonexistent"))
}

fn deconz_cmd_in(config_home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("deconz");
    cmd.env("HOME", config_home)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("RUST_LOG")
        .env_remove("DECONZ_PROFILE")
        .env_remove("DECONZ_HOST")
        .env_remove("DECONZ_PORT")
        .env_remove("DECONZ_WS_PORT")
        .env_remove("DECONZ_API_KEY")
        .env_remove("DECONZ_OUTPUT")
        .env_remove("DECONZ_INSECURE")
        .env_remove("DECONZ_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn full_state() -> Value {
    json!({
        "config": { "name": "Phoscon-GW", "websocketport": 443 },
        "lights": {
            "1": {
                "uniqueid": "AA:01",
                "name": "Hall",
                "type": "Dimmable light",
                "modelid": "LWB010",
                "state": { "on": false, "bri": 10 }
            }
        },
        "sensors": {
            "2": { "uniqueid": "BB:01", "name": "Door", "type": "ZHAOpenClose", "state": { "open": false } }
        },
        "groups": {
            "7": { "name": "Outside", "state": { "any_on": true } }
        }
    })
}

async fn gateway() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/{KEY}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(full_state()))
        .mount(&server)
        .await;
    server
}

/// Run the binary off the runtime so the mock server keeps serving.
async fn run(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

fn against(server: &MockServer, args: &[&str]) -> assert_cmd::Command {
    let port = server.address().port().to_string();
    let mut cmd = deconz_cmd();
    cmd.args(args)
        .args(["--host", "127.0.0.1", "--port", &port, "--api-key", KEY]);
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = deconz_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    deconz_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("deCONZ")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("events")),
    );
}

#[test]
fn test_version_flag() {
    deconz_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("deconz"));
}

#[test]
fn test_invalid_subcommand() {
    deconz_cmd()
        .arg("frobnicate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("frobnicate"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_for_each_shell() {
    for shell in ["bash", "zsh", "fish"] {
        deconz_cmd()
            .args(["completions", shell])
            .assert()
            .success()
            .stdout(predicate::str::contains("deconz"));
    }
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_points_at_toml() {
    deconz_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_profiles_plain() {
    let home = tempfile::tempdir().unwrap();
    let dir = home.path().join("deconz");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.toml"),
        "default_profile = \"home\"\n\n[profiles.home]\nhost = \"10.0.0.2\"\n\n[profiles.lab]\nhost = \"10.0.0.3\"\n",
    )
    .unwrap();

    deconz_cmd_in(home.path())
        .args(["config", "profiles", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("home\nlab\n"));
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_devices_without_host_is_usage_error() {
    let output = deconz_cmd().args(["devices", "list"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No gateway configured"));
}

#[test]
fn test_devices_without_key_is_auth_error() {
    let output = deconz_cmd()
        .args(["devices", "list", "--host", "127.0.0.1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("No API key"));
}

#[test]
fn test_set_rejects_non_object_body() {
    let output = deconz_cmd()
        .args(["devices", "set", "AA:01", "[1]", "--host", "127.0.0.1", "--api-key", KEY])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Against a gateway ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_list_json() {
    let server = gateway().await;
    let output = run(against(&server, &["devices", "list", "-o", "json"])).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let devices: Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<_> = devices
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["unique_id"].as_str().unwrap().to_owned())
        .collect();
    // Ordered by collection (groups, lights, sensors), then index.
    assert_eq!(ids, ["group_7", "AA:01", "BB:01"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_list_filters_by_kind() {
    let server = gateway().await;
    let output = run(against(
        &server,
        &["devices", "list", "--kind", "sensor", "-o", "plain"],
    ))
    .await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "BB:01\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_get_by_name() {
    let server = gateway().await;
    let output = run(against(&server, &["devices", "get", "hall"])).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("AA:01"));
    assert!(text.contains("LWB010"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_get_unknown_is_not_found() {
    let server = gateway().await;
    let output = run(against(&server, &["devices", "get", "Attic"])).await;
    assert_eq!(output.status.code(), Some(4), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_set_writes_light_state() {
    let server = gateway().await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/{KEY}/lights/1/state")))
        .and(body_json(json!({ "on": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "success": { "/lights/1/state/on": true } }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let output = run(against(
        &server,
        &["devices", "set", "AA:01", r#"{"on": true}"#, "-o", "json-compact"],
    ))
    .await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["path"], "lights/1/state");
    assert_eq!(result["success"][0]["/lights/1/state/on"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_key_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/{KEY}")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!([
            { "error": { "type": 1, "address": "/", "description": "unauthorized user" } }
        ])))
        .mount(&server)
        .await;

    let output = run(against(&server, &["devices", "list"])).await;
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("unauthorized user"));
}
