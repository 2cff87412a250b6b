//! WebSocket tests
//!
//! Text frames run as commands and results return on the sending connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use meshlink_session::test_utils::ScriptedLauncher;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::TestApp;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(app: &TestApp) -> Client {
    let (stream, _) = connect_async(app.ws_url()).await.unwrap();
    stream
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no reply within 5s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_raw_line_runs_command() {
    let device = ScriptedLauncher::new().respond("status", ["Battery: 4.1V", "Queue: 0"]);
    let app = TestApp::spawn(device).await;
    let mut client = connect(&app).await;

    client.send(Message::Text("status".into())).await.unwrap();
    let reply = next_json(&mut client).await;

    assert_eq!(reply["type"], "command_result");
    assert_eq!(reply["command"], "status");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["stdout"], "Battery: 4.1V\nQueue: 0");
    assert_eq!(reply["returnCode"], 0);
}

#[tokio::test]
async fn test_quoted_line_reaches_device_intact() {
    let device = ScriptedLauncher::new().respond("public", ["sent"]);
    let app = TestApp::spawn(device).await;
    let mut client = connect(&app).await;

    client
        .send(Message::Text("public \"hello mesh\"".into()))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;

    assert_eq!(reply["command"], "public \"hello mesh\"");
    assert_eq!(
        app.device.received_commands(),
        vec!["public \"hello mesh\"".to_string()]
    );
}

#[tokio::test]
async fn test_json_command_keeps_id() {
    let device = ScriptedLauncher::new().respond("ver", ["v1.9.0"]);
    let app = TestApp::spawn(device).await;
    let mut client = connect(&app).await;

    client
        .send(Message::Text(
            r#"{"type":"command","id":"req-7","args":["ver"],"timeoutSeconds":2}"#.into(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;

    assert_eq!(reply["id"], "req-7");
    assert_eq!(reply["stdout"], "v1.9.0");
}

#[tokio::test]
async fn test_bad_json_gets_error() {
    let app = TestApp::spawn(ScriptedLauncher::new()).await;
    let mut client = connect(&app).await;

    client
        .send(Message::Text(r#"{"type":"nonsense"}"#.into()))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;

    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().starts_with("Invalid message"));
    assert!(app.device.received_commands().is_empty());
}

#[tokio::test]
async fn test_results_only_reach_sender() {
    let device = ScriptedLauncher::new().respond("status", ["ok"]);
    let app = TestApp::spawn(device).await;
    let mut sender = connect(&app).await;
    let mut bystander = connect(&app).await;

    sender.send(Message::Text("status".into())).await.unwrap();
    let reply = next_json(&mut sender).await;
    assert_eq!(reply["stdout"], "ok");

    let stray = tokio::time::timeout(Duration::from_millis(500), bystander.next()).await;
    assert!(stray.is_err(), "bystander received {:?}", stray);
}

#[tokio::test]
async fn test_results_follow_send_order() {
    let device = ScriptedLauncher::new()
        .respond_after("slow", Duration::from_millis(50), ["first"])
        .respond("fast", ["second"]);
    let app = TestApp::spawn(device).await;
    let mut client = connect(&app).await;

    client.send(Message::Text("slow".into())).await.unwrap();
    client.send(Message::Text("fast".into())).await.unwrap();

    assert_eq!(next_json(&mut client).await["stdout"], "first");
    assert_eq!(next_json(&mut client).await["stdout"], "second");
}
