//! REST API tests
//!
//! Verify status codes and camelCase bodies the web front end relies on.

use std::time::Duration;

use meshlink_core::unix_now;
use meshlink_session::test_utils::ScriptedLauncher;
use serde_json::{json, Value};

use super::TestApp;

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_health_reports_session() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;

    let resp = reqwest::get(app.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["devicePath"], "scripted://device");
    assert_eq!(body["detectedDeviceName"], "TestNode");
    assert_eq!(body["nameSource"], "config");
    assert_eq!(body["serialPortSource"], "config");
    assert!(body["advertLog"]
        .as_str()
        .unwrap()
        .ends_with("TestNode.adverts.jsonl"));
    assert!(body["echoesLog"].is_string());
    assert!(body["acksLog"].is_string());
}

#[tokio::test]
async fn test_command_returns_device_output() {
    let device =
        ScriptedLauncher::new().respond("status", ["Battery: 4.1V", "Uptime: 3h", "Queue: 0"]);
    let app = TestApp::spawn(device).await;

    let resp = reqwest::Client::new()
        .post(app.url("/command"))
        .json(&json!({ "args": ["status"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["stdout"], "Battery: 4.1V\nUptime: 3h\nQueue: 0");
    assert_eq!(body["stderr"], "");
    assert_eq!(body["returnCode"], 0);
}

#[tokio::test]
async fn test_cli_alias_accepts_timeout_field() {
    let device = ScriptedLauncher::new().respond("ver", ["v1.9.0"]);
    let app = TestApp::spawn(device).await;

    let body: Value = reqwest::Client::new()
        .post(app.url("/cli"))
        .json(&json!({ "args": ["ver"], "timeout": 3 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["stdout"], "v1.9.0");
    assert!(app.device.received_commands().contains(&"ver".to_string()));
}

#[tokio::test]
async fn test_empty_args_rejected() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;

    let resp = reqwest::Client::new()
        .post(app.url("/command"))
        .json(&json!({ "args": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["success"], false);
    assert_eq!(body["stdout"], "");
    assert_eq!(body["stderr"], "Missing command arguments");
    assert_eq!(body["returnCode"], -1);
}

#[tokio::test]
async fn test_malformed_body_rejected_with_command_shape() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;

    let resp = reqwest::Client::new()
        .post(app.url("/command"))
        .header("content-type", "application/json")
        .body("{\"args\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["success"], false);
    assert_eq!(body["returnCode"], -1);
    assert!(!body["stderr"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_command_timeout_is_a_result() {
    let device =
        ScriptedLauncher::new().respond_after("wait_ack", Duration::from_millis(250), ["partial"]);
    let app = TestApp::spawn(device).await;

    let resp = reqwest::Client::new()
        .post(app.url("/command"))
        .json(&json!({ "args": ["wait_ack"], "timeoutSeconds": 0.3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["success"], false);
    assert_eq!(body["returnCode"], -1);
    assert!(body["stderr"]
        .as_str()
        .unwrap()
        .starts_with("Command timeout after"));
}

#[tokio::test]
async fn test_echo_registration_and_summary() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;
    let sent_at = unix_now();
    let client = reqwest::Client::new();

    let resp = client
        .post(app.url("/echo/register"))
        .json(&json!({ "channelIndex": 0, "timestamp": sent_at }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    app.device.emit(
        r#"{"payload_typename":"GRP_TXT","pkt_payload":"aabbcc","path":"a1","snr":6.5,"path_len":1}"#,
    );
    app.device.emit(
        r#"{"payload_typename":"GRP_TXT","pkt_payload":"aabbcc","path":"b2","snr":2.0,"path_len":1}"#,
    );
    let correlator = app.state.session.correlator().clone();
    wait_until(|| correlator.query_echo_count(sent_at, 0) == 2).await;

    let summary: Value = reqwest::get(app.url("/echo/summary"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sent = summary["sentEchoes"].as_array().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["pktPayload"], "aabbcc");
    assert_eq!(sent[0]["paths"], json!(["a1", "b2"]));
    assert!(sent[0]["analyzerUrl"]
        .as_str()
        .unwrap()
        .ends_with(sent[0]["packetHash"].as_str().unwrap()));
    assert!(summary["incomingPaths"].as_array().unwrap().is_empty());

    let count: Value = reqwest::get(app.url(&format!(
        "/echo/count?timestamp={}&channelIndex=0",
        sent_at
    )))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(count["count"], 2);
}

#[tokio::test]
async fn test_echo_register_rejects_bad_secret() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;

    let resp = reqwest::Client::new()
        .post(app.url("/echo/register"))
        .json(&json!({
            "channelIndex": 0,
            "timestamp": unix_now(),
            "secret": "not-hex",
            "text": "hello"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(!app.state.session.correlator().has_pending_send());
}

#[tokio::test]
async fn test_ack_status_lookup() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;

    app.device
        .emit(r#"{"payload_typename":"ACK","code":"1a2b3c4d","snr":3.0,"route_typename":"FLOOD","path":""}"#);
    let correlator = app.state.session.correlator().clone();
    wait_until(|| correlator.ack_status(&["1a2b3c4d"])["1a2b3c4d"].is_some()).await;

    let body: Value = reqwest::get(app.url("/ack/status?codes=1a2b3c4d,ffff0000"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["1a2b3c4d"]["code"], "1a2b3c4d");
    assert_eq!(body["1a2b3c4d"]["snr"], 3.0);
    assert!(body["ffff0000"].is_null());
}

#[tokio::test]
async fn test_manual_add_contacts_toggle() {
    let device = ScriptedLauncher::new().respond("set", ["ok"]);
    let app = TestApp::spawn(device).await;

    let resp = reqwest::Client::new()
        .post(app.url("/settings/manual-add-contacts"))
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "manual_add_contacts set to off");

    let saved: Value = serde_json::from_str(
        &std::fs::read_to_string(app.dir.path().join(".webui_settings.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved["manual_add_contacts"], false);
    assert!(app
        .device
        .received()
        .contains(&"set manual_add_contacts off".to_string()));
}

#[tokio::test]
async fn test_manual_add_contacts_requires_flag() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;

    let resp = reqwest::Client::new()
        .post(app.url("/settings/manual-add-contacts"))
        .json(&json!({ "enabled": "yes" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}
