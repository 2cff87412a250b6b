//! WebSocket connection handling
//!
//! Every text frame becomes one device command. Results go back on the
//! connection that sent the command and nowhere else.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use meshlink_session::quote_args;

use super::messages::{parse_client_text, ClientMessage, WsMessage};
use super::rest::timeout_from_secs;
use crate::AppState;

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().simple().to_string();
    info!(conn = %conn_id, "New WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();

    // Replies for this connection only
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsMessage>();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = reply_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize reply: {}", e),
            }
        }
    });

    // Commands run one at a time so a client sees results in send order
    let recv_conn = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    debug!(conn = %recv_conn, "Received WebSocket text: {}", text);
                    let reply = match parse_client_text(&text) {
                        Ok(client_msg) => handle_client_message(client_msg, &state).await,
                        Err(message) => {
                            warn!(conn = %recv_conn, "Failed to parse client message: {}", message);
                            WsMessage::Error { message }
                        }
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(conn = %conn_id, "WebSocket connection closed");
}

/// Run a client command and build its reply
async fn handle_client_message(msg: ClientMessage, state: &AppState) -> WsMessage {
    match msg {
        ClientMessage::Command {
            id,
            args,
            timeout_seconds,
        } => {
            let command = quote_args(&args);
            let output = state
                .session
                .execute(args, timeout_from_secs(timeout_seconds))
                .await;
            WsMessage::command_result(id, command, output)
        }
    }
}
