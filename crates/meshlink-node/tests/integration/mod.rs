//! Integration tests for meshlink-node
//!
//! Each test serves the real router on an ephemeral port, backed by a
//! session talking to the scripted fake device.

mod rest_api;
mod websocket_api;

use std::net::SocketAddr;
use std::sync::Arc;

use meshlink_node::{server, AppState};
use meshlink_session::test_utils::{fast_config, ScriptedLauncher};
use meshlink_session::{SerialPortSource, SessionManager};
use tempfile::TempDir;

/// A running node and the device behind it
pub struct TestApp {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub device: ScriptedLauncher,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn spawn(device: ScriptedLauncher) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionManager::start(fast_config(dir.path()), Arc::new(device.clone()))
            .await
            .unwrap();
        let state = Arc::new(AppState::new(session, SerialPortSource::Config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = server::create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            device,
            dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}
