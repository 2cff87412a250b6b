//! REST API endpoints

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use meshlink_core::payload::ChannelSecret;
use meshlink_session::{
    AckRecord, BridgeError, CommandOutput, EchoSummary, NameSource, SendFingerprint,
    SerialPortSource,
};

use crate::AppState;

/// Command request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBody {
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds; `timeout` is accepted for older clients
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<f64>,
}

/// Convert a caller-supplied timeout, ignoring nonsense values
pub(crate) fn timeout_from_secs(secs: Option<f64>) -> Option<Duration> {
    secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
        .filter(|d| !d.is_zero())
}

/// Run one device command
pub async fn run_command(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CommandBody>, JsonRejection>,
) -> (StatusCode, Json<CommandOutput>) {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected command body: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: rejection.body_text(),
                    return_code: -1,
                }),
            );
        }
    };

    let timeout = timeout_from_secs(body.timeout_seconds);
    match state.session.submit(body.args, timeout).await {
        Ok(output) => (StatusCode::OK, Json(output)),
        Err(e) => (status_for(&e), Json(CommandOutput::from_error(&e))),
    }
}

fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::EmptyCommand => StatusCode::BAD_REQUEST,
        BridgeError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        // Timeouts and device failures are command results, not HTTP errors
        _ => StatusCode::OK,
    }
}

/// Health report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub device_path: String,
    pub detected_device_name: String,
    pub name_source: NameSource,
    pub serial_port_source: SerialPortSource,
    pub advert_log: String,
    pub echoes_log: String,
    pub acks_log: String,
    pub restarts: u64,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.session.health();
    Json(HealthResponse {
        status: if health.alive { "healthy" } else { "unhealthy" },
        device_path: health.device_path,
        detected_device_name: health.device_name,
        name_source: health.name_source,
        serial_port_source: state.serial_port_source,
        advert_log: health.advert_log.display().to_string(),
        echoes_log: health.echoes_log.display().to_string(),
        acks_log: health.acks_log.display().to_string(),
        restarts: health.restarts,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Outcome of a settings or registration call
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Announcement of a channel message about to be sent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoRegisterBody {
    pub channel_index: u8,
    pub timestamp: f64,
    /// Channel secret, hex; enables exact echo matching together with `text`
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub sender_timestamp: Option<u32>,
    #[serde(default)]
    pub txt_type: Option<u8>,
    #[serde(default)]
    pub text: Option<String>,
}

impl EchoRegisterBody {
    fn fingerprint(&self) -> Result<Option<SendFingerprint>, String> {
        let (Some(secret), Some(text)) = (self.secret.as_deref(), self.text.as_ref()) else {
            return Ok(None);
        };
        let secret = ChannelSecret::from_hex(secret).map_err(|e| e.to_string())?;
        Ok(Some(SendFingerprint {
            secret,
            sender_timestamp: self
                .sender_timestamp
                .unwrap_or(self.timestamp as u32),
            txt_type: self.txt_type.unwrap_or(0),
            text: text.clone(),
        }))
    }
}

/// Open the echo window for a message about to be sent
pub async fn register_echo(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EchoRegisterBody>, JsonRejection>,
) -> (StatusCode, Json<ApiResponse>) {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failed(rejection.body_text())),
            )
        }
    };

    let fingerprint = match body.fingerprint() {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failed(format!("Invalid channel secret: {}", e))),
            )
        }
    };

    let verified = fingerprint.is_some();
    state
        .session
        .correlator()
        .register_pending_send(body.channel_index, body.timestamp, fingerprint);

    let message = if verified {
        "pending send registered (verified)"
    } else {
        "pending send registered"
    };
    (StatusCode::OK, Json(ApiResponse::ok(message)))
}

/// Sent echoes and incoming paths
pub async fn echo_summary(State(state): State<Arc<AppState>>) -> Json<EchoSummary> {
    Json(state.session.correlator().summary())
}

/// Echo count query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoCountQuery {
    pub timestamp: f64,
    #[serde(default)]
    pub channel_index: u8,
}

#[derive(Debug, Serialize)]
pub struct EchoCount {
    pub count: usize,
}

/// Number of distinct repeat paths heard for a sent message
pub async fn echo_count(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EchoCountQuery>,
) -> Json<EchoCount> {
    let count = state
        .session
        .correlator()
        .query_echo_count(query.timestamp, query.channel_index);
    Json(EchoCount { count })
}

/// ACK status query
#[derive(Debug, Deserialize)]
pub struct AckStatusQuery {
    /// Comma separated ACK codes
    #[serde(default)]
    pub codes: String,
}

/// First-seen ACK per requested code, `null` when never heard
pub async fn ack_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AckStatusQuery>,
) -> Json<BTreeMap<String, Option<AckRecord>>> {
    let codes: Vec<&str> = query
        .codes
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .collect();
    Json(state.session.correlator().ack_status(&codes))
}

#[derive(Debug, Deserialize)]
pub struct ManualAddContactsBody {
    pub enabled: bool,
}

/// Persist and apply the manual contact approval flag
pub async fn set_manual_add_contacts(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ManualAddContactsBody>, JsonRejection>,
) -> (StatusCode, Json<ApiResponse>) {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failed(rejection.body_text())),
            )
        }
    };

    match state.session.set_manual_add_contacts(body.enabled).await {
        Ok(output) if output.success => {
            let value = if body.enabled { "on" } else { "off" };
            info!("manual_add_contacts set to {}", value);
            (
                StatusCode::OK,
                Json(ApiResponse::ok(format!("manual_add_contacts set to {}", value))),
            )
        }
        Ok(output) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failed(format!(
                "Failed to apply setting: {}",
                output.stderr
            ))),
        ),
        Err(e) => {
            warn!(code = e.error_code(), "Failed to update settings: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(format!("Failed to apply setting: {}", e))),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(Some(2.5)), Some(Duration::from_millis(2500)));
        assert_eq!(timeout_from_secs(Some(0.0)), None);
        assert_eq!(timeout_from_secs(Some(-1.0)), None);
        assert_eq!(timeout_from_secs(Some(f64::NAN)), None);
        assert_eq!(timeout_from_secs(None), None);
    }

    #[test]
    fn test_command_body_accepts_timeout_alias() {
        let body: CommandBody =
            serde_json::from_str(r#"{"args":["recv"],"timeout":30}"#).unwrap();
        assert_eq!(body.args, vec!["recv"]);
        assert_eq!(body.timeout_seconds, Some(30.0));

        let body: CommandBody =
            serde_json::from_str(r#"{"args":["status"],"timeoutSeconds":1.5}"#).unwrap();
        assert_eq!(body.timeout_seconds, Some(1.5));
    }

    #[test]
    fn test_fingerprint_needs_secret_and_text() {
        let body: EchoRegisterBody =
            serde_json::from_str(r#"{"channelIndex":0,"timestamp":1760000000.5}"#).unwrap();
        assert!(body.fingerprint().unwrap().is_none());

        let body: EchoRegisterBody = serde_json::from_str(
            r#"{"channelIndex":0,"timestamp":1760000000.5,"secret":"8b3387e9c5cdea6ac9e5edbaa115cd72","text":"hi"}"#,
        )
        .unwrap();
        let fingerprint = body.fingerprint().unwrap().unwrap();
        assert_eq!(fingerprint.sender_timestamp, 1_760_000_000);
        assert_eq!(fingerprint.txt_type, 0);
    }

    #[test]
    fn test_fingerprint_rejects_bad_secret() {
        let body: EchoRegisterBody = serde_json::from_str(
            r#"{"channelIndex":0,"timestamp":1.0,"secret":"zz","text":"hi"}"#,
        )
        .unwrap();
        assert!(body.fingerprint().is_err());
    }

    #[test]
    fn test_status_for_errors() {
        assert_eq!(status_for(&BridgeError::EmptyCommand), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&BridgeError::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&BridgeError::ResponseLost), StatusCode::OK);
    }
}
