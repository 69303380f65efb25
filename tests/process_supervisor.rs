//! Supervisor behaviour against real child processes.
#![cfg(unix)]

use std::time::{Duration, Instant};

use artifact_explainer::service::ipc_types::ServiceRequest;
use artifact_explainer::{NoResponse, ProcessSupervisor, ServiceCommand, ServiceTimeouts};
use explainer_types::ServiceState;
use serde_json::json;

fn timeouts() -> ServiceTimeouts {
    ServiceTimeouts {
        handshake: Duration::from_secs(5),
        request: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
    }
}

fn shell(script: &str) -> ServiceCommand {
    ServiceCommand::new("sh").arg("-c").arg(script)
}

fn settled(script: &str) -> ProcessSupervisor {
    let supervisor = ProcessSupervisor::spawn(&shell(script), timeouts());
    supervisor.wait_until_settled(Duration::from_secs(10));
    supervisor
}

#[test]
fn test_noise_then_ready_then_round_trip() {
    let supervisor = settled(
        r#"echo "loading model..."
echo "Batches: 100%" >&2
echo '{"status":"ready","artifacts":42}'
while read line; do
  echo "progress: handling request"
  echo '{"ok":true,"x":1}'
done"#,
    );

    assert_eq!(supervisor.state(), ServiceState::Ready);
    assert_eq!(supervisor.artifact_count(), 42);

    let reply = supervisor.send(&ServiceRequest::Status).unwrap();
    assert_eq!(serde_json::Value::Object(reply), json!({"ok": true, "x": 1}));

    supervisor.shutdown();
    assert_eq!(supervisor.state(), ServiceState::Terminated);
}

#[test]
fn test_error_handshake_fails() {
    let supervisor = settled(r#"echo "importing..."; echo '{"error":"model weights missing"}'; sleep 5"#);

    assert_eq!(supervisor.state(), ServiceState::Failed);
    assert_eq!(supervisor.failure_reason().as_deref(), Some("model weights missing"));
}

#[test]
fn test_early_exit_fails_without_waiting_for_timeout() {
    let started = Instant::now();
    let supervisor = settled("echo 'crashed during import'; exit 3");

    assert_eq!(supervisor.state(), ServiceState::Failed);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_silent_request_times_out_but_service_stays_ready() {
    let supervisor = ProcessSupervisor::spawn(
        &shell(r#"echo '{"status":"ready","artifacts":1}'; while read line; do :; done"#),
        ServiceTimeouts {
            request: Duration::from_millis(300),
            ..timeouts()
        },
    );
    supervisor.wait_until_settled(Duration::from_secs(10));

    assert!(matches!(
        supervisor.send(&ServiceRequest::Status),
        Err(NoResponse::Timeout(_))
    ));
    assert_eq!(supervisor.state(), ServiceState::Ready);
}

#[test]
fn test_shutdown_force_kills_after_grace() {
    let supervisor = settled(
        r#"trap '' TERM
echo '{"status":"ready","artifacts":1}'
while true; do sleep 1; done"#,
    );
    assert_eq!(supervisor.state(), ServiceState::Ready);

    let started = Instant::now();
    supervisor.shutdown();
    let elapsed = started.elapsed();

    assert_eq!(supervisor.state(), ServiceState::Terminated);
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
}

#[test]
fn test_shutdown_while_starting() {
    let supervisor = ProcessSupervisor::spawn(&shell("sleep 30"), timeouts());
    assert_eq!(supervisor.state(), ServiceState::Starting);

    let started = Instant::now();
    supervisor.shutdown();

    assert_eq!(supervisor.state(), ServiceState::Terminated);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_invalid_utf8_output_is_noise() {
    let supervisor = settled(
        r#"printf 'loading \377\376 model\n'
echo '{"status":"ready","artifacts":42}'
while read line; do
  printf 'warn \377\n' >&2
  echo '{"ok":true}'
done"#,
    );

    assert_eq!(supervisor.state(), ServiceState::Ready, "{:?}", supervisor.failure_reason());
    assert_eq!(supervisor.artifact_count(), 42);

    for _ in 0..2 {
        let reply = supervisor.send(&ServiceRequest::Status).unwrap();
        assert_eq!(reply.get("ok"), Some(&json!(true)));
    }
    assert_eq!(supervisor.state(), ServiceState::Ready);
}

#[test]
fn test_stderr_is_merged_into_output() {
    let supervisor = settled(r#"echo '{"status":"ready","artifacts":7}' >&2; sleep 5"#);

    assert_eq!(supervisor.state(), ServiceState::Ready);
    assert_eq!(supervisor.artifact_count(), 7);
}
