//! Driver runner tests against real subprocesses.
//!
//! Fake drivers are small scripts written into a tempdir. Success paths
//! first, then the failure and cancellation paths.

use async_trait::async_trait;
use serde_json::json;
use servo_agent::cancel::CancelRequested;
use servo_agent::config::{Config, DriverPaths, StderrMode};
use servo_agent::driver::{DriverInput, DriverRunner};
use servo_agent::error::DriverError;
use servo_agent::progress::ProgressSink;
use servo_protocol::ProgressRecord;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const INFO_HEADER: &str = r#"#!/bin/sh
if [ "$1" = "--info" ]; then
  echo '{"version":"1.0","has_cancel":false}'
  exit 0
fi
"#;

fn write_driver(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write driver script");
    let mut perms = std::fs::metadata(&path).expect("stat driver").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod driver");
    path
}

fn test_config() -> Config {
    Config {
        app_id: "app1".to_string(),
        base_url: "http://127.0.0.1:1/servo".to_string(),
        auth_token: None,
        agent_id: "servo/test".to_string(),
        interactive: false,
        delay: None,
        retry_delay: Duration::from_millis(10),
        io_timeout: None,
        stderr_mode: StderrMode::All,
        perf_expr: None,
        drivers: DriverPaths::default(),
    }
}

/// Sink that remembers every record it sees.
#[derive(Default)]
struct Collector(Vec<ProgressRecord>);

#[async_trait]
impl ProgressSink for Collector {
    async fn report(&mut self, record: &ProgressRecord) -> Result<(), CancelRequested> {
        self.0.push(record.clone());
        Ok(())
    }
}

/// Sink that cancels on the first record.
struct CancelOnFirst;

#[async_trait]
impl ProgressSink for CancelOnFirst {
    async fn report(&mut self, _record: &ProgressRecord) -> Result<(), CancelRequested> {
        Err(CancelRequested)
    }
}

// =============================================================================
// Success paths
// =============================================================================

#[tokio::test]
async fn streams_progress_then_terminal_response() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        &format!(
            "{INFO_HEADER}\
             echo '{{\"progress\": 50, \"message\": \"halfway\"}}'\n\
             echo '{{\"status\":\"ok\",\"metrics\":{{\"requests throughput\":{{\"value\":123}}}}}}'\n"
        ),
    );

    let runner = DriverRunner::new(&test_config());
    let mut sink = Collector::default();
    let response = runner
        .run(&driver, "app1", DriverInput::Request(json!({"metrics": ["x"]})), &mut sink)
        .await
        .expect("driver run should succeed");

    assert!(response.is_ok());
    assert_eq!(sink.0.len(), 1);
    assert_eq!(sink.0[0].progress, 50);
    assert_eq!(sink.0[0].message.as_deref(), Some("halfway"));
    assert_eq!(
        response.get("metrics").unwrap()["requests throughput"]["value"],
        json!(123)
    );
}

#[tokio::test]
async fn stdin_reaches_the_driver_completely() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "adjust",
        &format!(
            "{INFO_HEADER}\
             BYTES=$(wc -c | tr -d ' ')\n\
             echo \"{{\\\"status\\\":\\\"ok\\\",\\\"received\\\":$BYTES}}\"\n"
        ),
    );

    // Large enough to need several chunked writes.
    let request = json!({ "state": { "payload": "x".repeat(4000) } });
    let expected = serde_json::to_vec(&request).unwrap().len();

    let runner = DriverRunner::new(&test_config());
    let response = runner
        .run(&driver, "app1", DriverInput::Request(request), &mut Collector::default())
        .await
        .expect("driver run should succeed");

    assert_eq!(response.get("received").unwrap(), &json!(expected));
}

#[tokio::test]
async fn blank_stdout_lines_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        &format!(
            "{INFO_HEADER}\
             echo ''\n\
             echo '{{\"status\":\"ok\",\"metrics\":{{\"m\":{{\"value\":1}}}}}}'\n"
        ),
    );

    let runner = DriverRunner::new(&test_config());
    let response = runner
        .run(&driver, "app1", DriverInput::Query("--describe"), &mut Collector::default())
        .await
        .expect("driver run should succeed");
    assert!(response.is_ok());
}

#[tokio::test]
async fn last_terminal_line_wins() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "adjust",
        &format!(
            "{INFO_HEADER}\
             echo '{{\"status\":\"ok\",\"round\":1}}'\n\
             echo '{{\"status\":\"ok\",\"round\":2}}'\n"
        ),
    );

    let runner = DriverRunner::new(&test_config());
    let response = runner
        .run(&driver, "app1", DriverInput::Query("--query"), &mut Collector::default())
        .await
        .expect("driver run should succeed");
    assert_eq!(response.get("round").unwrap(), &json!(2));
}

#[tokio::test]
async fn probe_reads_driver_info() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        "#!/bin/sh\n\
         echo '{\"version\":\"2.1\",\"has_cancel\":true}'\n",
    );

    let runner = DriverRunner::new(&test_config());
    let info = runner.probe(&driver, "app1").await.expect("probe should succeed");
    assert!(info.has_cancel);
    assert_eq!(info.version.as_deref(), Some("2.1"));
}

#[tokio::test]
async fn silent_driver_reports_nodata() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(dir.path(), "measure", &format!("{INFO_HEADER}exit 0\n"));

    let runner = DriverRunner::new(&test_config());
    let response = runner
        .run(&driver, "app1", DriverInput::Query("--describe"), &mut Collector::default())
        .await
        .expect("driver run should succeed");
    assert!(!response.has_status());
    assert_eq!(response.status_or_default(), "nodata");
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn non_json_stdout_line_is_a_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        &format!("{INFO_HEADER}echo 'this is not json'\n"),
    );

    let runner = DriverRunner::new(&test_config());
    let err = runner
        .run(&driver, "app1", DriverInput::Query("--describe"), &mut Collector::default())
        .await
        .expect_err("non-JSON output must fail");
    assert!(matches!(err, DriverError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn non_zero_exit_appends_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "adjust",
        &format!(
            "{INFO_HEADER}\
             echo 'diagnostic one' >&2\n\
             echo 'diagnostic two' >&2\n\
             exit 3\n"
        ),
    );

    let runner = DriverRunner::new(&test_config());
    let response = runner
        .run(&driver, "app1", DriverInput::Query("--query"), &mut Collector::default())
        .await
        .expect("runner folds a failed exit into the response");

    assert_eq!(response.status_or_default(), "failed");
    let message = response.message().unwrap();
    assert!(message.contains("stderr: diagnostic one"), "message: {message}");
    assert!(message.contains("diagnostic two"));
}

#[tokio::test]
async fn ok_status_with_failed_exit_is_downgraded() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "adjust",
        &format!(
            "{INFO_HEADER}\
             echo '{{\"status\":\"ok\"}}'\n\
             exit 2\n"
        ),
    );

    let runner = DriverRunner::new(&test_config());
    let response = runner
        .run(&driver, "app1", DriverInput::Query("--query"), &mut Collector::default())
        .await
        .unwrap();
    assert_eq!(response.status_or_default(), "failed");
}

#[tokio::test]
async fn minimal_stderr_mode_keeps_two_lines() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "adjust",
        &format!(
            "{INFO_HEADER}\
             printf 'one\\ntwo\\nthree\\n' >&2\n\
             exit 1\n"
        ),
    );

    let mut config = test_config();
    config.stderr_mode = StderrMode::Minimal;
    let runner = DriverRunner::new(&config);
    let response = runner
        .run(&driver, "app1", DriverInput::Query("--query"), &mut Collector::default())
        .await
        .unwrap();

    let message = response.message().unwrap();
    assert!(message.contains("one"));
    assert!(message.contains("two"));
    assert!(!message.contains("three"));
}

#[tokio::test]
async fn io_timeout_kills_a_stuck_driver() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        &format!(
            "{INFO_HEADER}\
             sleep 5 >/dev/null 2>&1\n\
             echo '{{\"status\":\"ok\"}}'\n"
        ),
    );

    let mut config = test_config();
    config.io_timeout = Some(Duration::from_millis(300));
    let runner = DriverRunner::new(&config);

    let started = Instant::now();
    let err = runner
        .run(&driver, "app1", DriverInput::Query("--describe"), &mut Collector::default())
        .await
        .expect_err("stuck driver must time out");
    assert!(matches!(err, DriverError::Timeout(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancellation_kills_a_driver_without_cancel_support() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        &format!(
            "{INFO_HEADER}\
             echo '{{\"progress\": 10}}'\n\
             sleep 30 >/dev/null 2>&1\n\
             echo '{{\"status\":\"ok\"}}'\n"
        ),
    );

    let runner = DriverRunner::new(&test_config());
    let started = Instant::now();
    let response = runner
        .run(&driver, "app1", DriverInput::Request(json!({})), &mut CancelOnFirst)
        .await
        .expect("a killed driver still yields a response");

    assert!(started.elapsed() < Duration::from_secs(10));
    // Killed before any terminal line: empty response, failed by exit status.
    assert_eq!(response.status_or_default(), "failed");
}

#[tokio::test]
async fn cancellation_signals_a_cooperative_driver() {
    let dir = tempfile::tempdir().unwrap();
    let driver = write_driver(
        dir.path(),
        "measure",
        r#"#!/usr/bin/env python3
import json, signal, sys, time

if len(sys.argv) > 1 and sys.argv[1] == "--info":
    print(json.dumps({"version": "1.0", "has_cancel": True}))
    sys.exit(0)

def handle_cancel(signum, frame):
    print(json.dumps({"status": "cancelled", "reason": "user stop"}), flush=True)
    sys.exit(0)

signal.signal(signal.SIGUSR1, handle_cancel)
print(json.dumps({"progress": 10}), flush=True)
time.sleep(30)
print(json.dumps({"status": "ok"}), flush=True)
"#,
    );

    let runner = DriverRunner::new(&test_config());
    let started = Instant::now();
    let response = runner
        .run(&driver, "app1", DriverInput::Request(json!({})), &mut CancelOnFirst)
        .await
        .expect("cancelled driver reports its own status");

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(response.status().as_deref(), Some("cancelled"));
    assert_eq!(response.reason().as_deref(), Some("user stop"));
}
