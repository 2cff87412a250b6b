//! Integration tests for the command session manager
//!
//! These tests drive a full session against the scripted fake device:
//! - Quiescence-based completion and program-order dispatch
//! - Caller timeouts and late output isolation
//! - Process exit, fail-all and watchdog restart
//! - Event lines interleaved with command output
//! - Device name detection and log retargeting

use meshlink_session::test_utils::{fast_config, ScriptedLauncher};
use meshlink_session::{BridgeError, NameSource, SessionConfig, SessionManager};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

async fn start(config: SessionConfig, device: &ScriptedLauncher) -> Arc<SessionManager> {
    SessionManager::start(config, Arc::new(device.clone()))
        .await
        .expect("session should start")
}

/// Poll `check` every 20ms until it holds or `within` elapses
async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ============================================================================
// Command Completion Tests
// ============================================================================

#[tokio::test]
async fn test_status_three_lines_then_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new().respond(
        "status",
        ["Battery: 4.12V", "Uptime: 3h 12m", "Queue: 0"],
    );
    let session = start(fast_config(dir.path()), &device).await;

    let output = session
        .submit(args(&["status"]), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(output.success);
    assert_eq!(output.stdout, "Battery: 4.12V\nUptime: 3h 12m\nQueue: 0");
    assert_eq!(output.return_code, 0);

    session.shutdown().await;
}

#[tokio::test]
async fn test_commands_written_in_program_order() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new()
        .respond("first", ["one"])
        .respond("second", ["two"])
        .respond("third", ["three"])
        .respond("fourth", ["four"]);
    let session = start(fast_config(dir.path()), &device).await;

    let (a, b, c, d) = tokio::join!(
        session.submit(args(&["first"]), None),
        session.submit(args(&["second"]), None),
        session.submit(args(&["third"]), None),
        session.submit(args(&["fourth"]), None),
    );

    assert_eq!(a.unwrap().stdout, "one");
    assert_eq!(b.unwrap().stdout, "two");
    assert_eq!(c.unwrap().stdout, "three");
    assert_eq!(d.unwrap().stdout, "four");
    assert_eq!(
        device.received_commands(),
        args(&["first", "second", "third", "fourth"])
    );

    session.shutdown().await;
}

#[tokio::test]
async fn test_arguments_are_quoted() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new().respond("chan", ["sent"]);
    let session = start(fast_config(dir.path()), &device).await;

    let output = session
        .submit(args(&["chan", "0", "hello \"mesh\" world"]), None)
        .await
        .unwrap();
    assert_eq!(output.stdout, "sent");
    assert_eq!(
        device.received_commands(),
        vec!["chan 0 \"hello \\\"mesh\\\" world\"".to_string()]
    );

    session.shutdown().await;
}

#[tokio::test]
async fn test_empty_command_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new();
    let session = start(fast_config(dir.path()), &device).await;

    let err = session.submit(Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, BridgeError::EmptyCommand));

    let output = session.execute(Vec::new(), None).await;
    assert!(!output.success);
    assert_eq!(output.stderr, "Missing command arguments");

    session.shutdown().await;
}

#[tokio::test]
async fn test_silent_command_completes_empty() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new();
    let session = start(fast_config(dir.path()), &device).await;

    let output = session.submit(args(&["nothing"]), None).await.unwrap();
    assert!(output.success);
    assert_eq!(output.stdout, "");

    session.shutdown().await;
}

// ============================================================================
// Timeout Tests
// ============================================================================

#[tokio::test]
async fn test_timeout_then_late_output_does_not_corrupt_next() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new()
        .respond_after("wait_msg", Duration::from_millis(250), ["partial"])
        .respond("status", ["fresh"]);
    let session = start(fast_config(dir.path()), &device).await;

    // Output is still arriving when the caller gives up
    let err = session
        .submit(args(&["wait_msg"]), Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::CommandTimeout { .. }));

    device.emit("late reply");
    let output = session.submit(args(&["status"]), None).await.unwrap();
    assert_eq!(output.stdout, "fresh");

    session.shutdown().await;
}

#[tokio::test]
async fn test_slow_command_waits_minimum_elapsed() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new()
        .respond_after("recv", Duration::from_millis(500), ["msg from Bob"]);
    let session = start(fast_config(dir.path()), &device).await;

    // 0.7 * 1s keeps the command open past the 500ms silence
    let output = session
        .submit(args(&["recv"]), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(output.stdout, "msg from Bob");

    session.shutdown().await;
}

// ============================================================================
// Process Failure Tests
// ============================================================================

#[tokio::test]
async fn test_process_exit_fails_command_then_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new()
        .exit_on("reboot", Some(1))
        .respond("status", ["back"]);
    let session = start(fast_config(dir.path()), &device).await;

    let err = session
        .submit(args(&["reboot"]), Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ProcessExited { exit_code: Some(1) }));
    assert!(err.is_fatal());

    let output = session.execute(args(&["status"]), None).await;
    assert!(output.success, "stderr: {}", output.stderr);
    assert_eq!(output.stdout, "back");

    assert_eq!(device.launch_count(), 2);
    let settings_applied = device
        .received()
        .iter()
        .filter(|l| l.as_str() == "set json_log_rx on")
        .count();
    assert_eq!(settings_applied, 2);
    assert_eq!(session.health().restarts, 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_restart_retries_after_failed_launch() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new().respond("status", ["ok"]);
    let session = start(fast_config(dir.path()), &device).await;

    device.fail_next_launches(1);
    device.crash(Some(137));

    assert!(device.wait_for_launches(3, Duration::from_secs(3)).await);
    assert!(eventually(Duration::from_secs(2), || session.health().alive).await);

    let output = session.submit(args(&["status"]), None).await.unwrap();
    assert_eq!(output.stdout, "ok");

    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_outstanding() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new();
    let session = start(fast_config(dir.path()), &device).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.submit(args(&["wait_ack"]), None).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    session.shutdown().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(BridgeError::ShuttingDown)));
    assert!(!session.health().alive);

    let err = session.submit(args(&["status"]), None).await.unwrap_err();
    assert!(matches!(err, BridgeError::ShuttingDown));
}

// ============================================================================
// Stream Classification Tests
// ============================================================================

#[tokio::test]
async fn test_events_interleaved_with_reply() {
    let dir = tempfile::tempdir().unwrap();
    let advert = r#"{"payload_typename":"ADVERT","pkt_payload":"00"}"#;
    let device = ScriptedLauncher::new().respond("contacts", ["Alice", advert, "Bob"]);
    let session = start(fast_config(dir.path()), &device).await;

    let output = session.submit(args(&["contacts"]), None).await.unwrap();
    assert_eq!(output.stdout, "Alice\nBob");

    let advert_log = session.health().advert_log;
    let raw = std::fs::read_to_string(advert_log).unwrap();
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.contains("\"ts\""));

    session.shutdown().await;
}

#[tokio::test]
async fn test_unsolicited_repeat_and_ack_reach_correlator() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new();
    let session = start(fast_config(dir.path()), &device).await;
    let correlator = session.correlator().clone();

    correlator.register_pending_send(0, 1_760_000_000.0, None);
    device.emit(r#"{"payload_typename":"GRP_TXT","pkt_payload":"aabbcc","path":"a1","snr":6.5,"path_len":1}"#);
    device.emit(r#"{"payload_typename":"ACK","code":"1a2b3c4d","snr":3.0,"route_typename":"FLOOD","path":""}"#);
    device.emit(r#"{"payload_typename":"ACK","code":"1a2b3c4d","snr":-12.0}"#);

    assert!(
        eventually(Duration::from_secs(2), || {
            correlator.summary().sent_echoes.len() == 1
                && correlator.ack_status(&["1a2b3c4d"])["1a2b3c4d"].is_some()
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let acks = correlator.ack_status(&["1a2b3c4d"]);
    assert_eq!(acks["1a2b3c4d"].as_ref().unwrap().snr, Some(3.0));
    assert_eq!(correlator.query_echo_count(1_760_000_001.0, 0), 1);

    session.shutdown().await;
}

// ============================================================================
// Device Name Tests
// ============================================================================

#[tokio::test]
async fn test_prompt_name_retargets_logs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("TestNode.acks.jsonl"), "").unwrap();

    let device = ScriptedLauncher::new().with_prompt("MarWoj");
    let session = start(fast_config(dir.path()), &device).await;

    assert!(
        eventually(Duration::from_secs(2), || {
            session.health().name_source == NameSource::Prompt
        })
        .await
    );

    let health = session.health();
    assert_eq!(health.device_name, "MarWoj");
    assert!(health.echoes_log.ends_with("MarWoj.echoes.jsonl"));
    assert!(health.advert_log.ends_with("MarWoj.adverts.jsonl"));
    assert!(dir.path().join("MarWoj.acks.jsonl").exists());
    assert!(!dir.path().join("TestNode.acks.jsonl").exists());

    session.shutdown().await;
}

#[tokio::test]
async fn test_prompt_name_adopts_existing_logs() {
    let dir = tempfile::tempdir().unwrap();
    let now = meshlink_core::unix_now();
    let old = now - 8.0 * 86_400.0;
    std::fs::write(
        dir.path().join("MarWoj.acks.jsonl"),
        format!(
            "{{\"code\":\"c0de\",\"snr\":1.0,\"route\":\"FLOOD\",\"path\":\"\",\"ts\":{now}}}\n\
             {{\"code\":\"stale\",\"snr\":null,\"route\":null,\"path\":\"\",\"ts\":{old}}}\n"
        ),
    )
    .unwrap();

    let device = ScriptedLauncher::new().with_prompt("MarWoj");
    let session = start(fast_config(dir.path()), &device).await;

    assert!(
        eventually(Duration::from_secs(2), || {
            session.health().name_source == NameSource::Prompt
        })
        .await
    );

    let status = session.correlator().ack_status(&["c0de", "stale"]);
    assert!(status["c0de"].is_some());
    assert!(status["stale"].is_none());
    let raw = std::fs::read_to_string(dir.path().join("MarWoj.acks.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_reply_containing_separator_kept_whole() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new()
        .with_prompt("MarWoj")
        .respond("recv", ["Bob|* meet at noon", "MarWoj|* done"]);
    let session = start(fast_config(dir.path()), &device).await;

    assert!(
        eventually(Duration::from_secs(2), || {
            session.health().name_source == NameSource::Prompt
        })
        .await
    );

    let output = session.execute(args(&["recv"]), None).await;
    assert_eq!(output.stdout, "Bob|* meet at noon\ndone");
    assert_eq!(session.health().device_name, "MarWoj");
    assert!(!dir.path().join("Bob.acks.jsonl").exists());

    session.shutdown().await;
}

#[tokio::test]
async fn test_name_query_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.timing.name_grace = Duration::from_millis(100);

    let device = ScriptedLauncher::new()
        .respond(".infos", [r#"{"name": "Rooftop", "radio_freq": 869.525}"#]);
    let session = start(config, &device).await;

    assert!(
        eventually(Duration::from_secs(3), || {
            session.health().name_source == NameSource::Device
        })
        .await
    );
    assert_eq!(session.health().device_name, "Rooftop");
    assert!(device.received_commands().contains(&".infos".to_string()));

    session.shutdown().await;
}

#[tokio::test]
async fn test_name_stays_configured_without_answer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.timing.name_grace = Duration::from_millis(50);

    let device = ScriptedLauncher::new();
    let session = start(config, &device).await;

    assert!(
        eventually(Duration::from_secs(2), || {
            device.received_commands().contains(&".infos".to_string())
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    let health = session.health();
    assert_eq!(health.name_source, NameSource::Config);
    assert_eq!(health.device_name, "TestNode");

    session.shutdown().await;
}

// ============================================================================
// Settings Tests
// ============================================================================

#[tokio::test]
async fn test_manual_add_contacts_applied_at_start() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".webui_settings.json"),
        r#"{"manual_add_contacts": true}"#,
    )
    .unwrap();

    let device = ScriptedLauncher::new().respond("status", ["ok"]);
    let session = start(fast_config(dir.path()), &device).await;

    // Settings are written before any caller command
    session.submit(args(&["status"]), None).await.unwrap();
    let received = device.received();
    assert_eq!(
        received,
        args(&[
            "set json_log_rx on",
            "set print_adverts on",
            "msgs_subscribe",
            "set manual_add_contacts on",
            "status",
        ])
    );
    assert!(session.settings().manual_add_contacts);

    session.shutdown().await;
}

#[tokio::test]
async fn test_toggle_manual_add_contacts() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedLauncher::new().respond("set", ["ok"]);
    let session = start(fast_config(dir.path()), &device).await;

    let output = session.set_manual_add_contacts(true).await.unwrap();
    assert!(output.success);
    assert_eq!(
        device.received().last().map(String::as_str),
        Some("set manual_add_contacts on")
    );

    let raw = std::fs::read_to_string(dir.path().join(".webui_settings.json")).unwrap();
    assert!(raw.contains("\"manual_add_contacts\": true"));

    session.shutdown().await;
}
