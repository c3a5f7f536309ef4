//! CLI integration tests

use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the CLI with an isolated home directory so no stored settings leak in
fn idlescan(home: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_idlescan"))
        .args(args)
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("IDLESCAN_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    let output = idlescan(&home, &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Idle Resource Scanner"),
        "Should show app name"
    );
    assert!(stdout.contains("scan"), "Should show scan command");
    assert!(stdout.contains("tenants"), "Should show tenants command");
    assert!(stdout.contains("cache"), "Should show cache command");
    assert!(stdout.contains("health"), "Should show health command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("IDLESCAN_API_URL"), "Should show env var");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    let output = idlescan(&home, &["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("idlescan"), "Should show binary name");
}

/// Test scan subcommand help
#[test]
fn test_scan_help() {
    let home = TempDir::new().unwrap();
    let output = idlescan(&home, &["scan", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Scan help should succeed");
    assert!(
        stdout.contains("--window-days"),
        "Should show window-days option"
    );
    assert!(stdout.contains("--force"), "Should show force option");
    assert!(stdout.contains("--show-busy"), "Should show show-busy option");
}

/// Test missing required argument error handling
#[test]
fn test_scan_requires_tenant() {
    let home = TempDir::new().unwrap();
    let output = idlescan(&home, &["scan"]);

    assert!(!output.status.success(), "Missing tenant should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

/// Test that a scan report is passed through as JSON
#[test]
fn test_scan_prints_report_json() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/scans")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "tenant_id": "acme",
            "window_days": 7,
            "force_refresh": true
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "tenant_id": "acme",
                "verdicts": [{
                    "resource_id": "i-0abc",
                    "display_name": "build-box",
                    "region": "eu-west-1",
                    "is_idle": true,
                    "reasons": ["CPU utilization 0.4% below 1%"],
                    "signals": [],
                    "evaluated_at": "2024-03-01T12:30:00Z"
                }],
                "failures": [],
                "success_count": 1,
                "failure_count": 0,
                "from_cache": false
            })
            .to_string(),
        )
        .create();

    let home = TempDir::new().unwrap();
    let url = server.url();
    let output = idlescan(
        &home,
        &[
            "--api-url",
            &url,
            "--format",
            "json",
            "scan",
            "acme",
            "--window-days",
            "7",
            "--force",
        ],
    );

    mock.assert();
    assert!(output.status.success(), "Scan should succeed");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["tenant_id"], "acme");
    assert_eq!(report["verdicts"][0]["resource_id"], "i-0abc");
    assert_eq!(report["success_count"], 1);
}

/// Test that daemon errors surface with a non-zero exit
#[test]
fn test_api_error_exits_non_zero() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/cache/ghost")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"unknown tenant: ghost"}"#)
        .create();

    let home = TempDir::new().unwrap();
    let url = server.url();
    let output = idlescan(&home, &["--api-url", &url, "cache", "status", "ghost"]);

    mock.assert();
    assert!(!output.status.success(), "Unknown tenant should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("404"), "Should show status code: {}", stderr);
    assert!(stderr.contains("unknown tenant"), "Should show daemon message");
}

/// Test that stored settings are used when no flag is given
#[test]
fn test_config_set_persists_defaults() {
    let home = TempDir::new().unwrap();
    let output = idlescan(
        &home,
        &[
            "config",
            "set",
            "--api-url",
            "http://scanner.internal:9000",
            "--default-format",
            "json",
        ],
    );
    assert!(output.status.success(), "Config set should succeed");

    let stored = home
        .path()
        .join(".config")
        .join("idlescan")
        .join("config.json");
    let content = std::fs::read_to_string(stored).unwrap();
    assert!(content.contains("http://scanner.internal:9000"));

    let output = idlescan(&home, &["config", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("http://scanner.internal:9000"));
    assert!(stdout.contains("Json"));
}
