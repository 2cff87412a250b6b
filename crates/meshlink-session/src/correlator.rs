//! Echo and ACK correlation
//!
//! The radio protocol carries no message id, so the correlator recognises
//! repeats of locally sent channel messages by ciphertext identity. A send is
//! registered just before it goes out, opening a short window in which the
//! next unmatched overheard repeat is taken to be its first echo. When the
//! registration carries a [`SendFingerprint`] the repeat must also reproduce
//! the reconstructed ciphertext byte for byte before it is bound.
//!
//! All state sits behind one mutex of its own, separate from the command
//! book. Every mutation is appended to a JSONL log and replayed at startup.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use meshlink_core::payload::{analyzer_url, match_attempt, packet_hash, ChannelSecret};
use meshlink_core::{is_expired, unix_now};

use crate::classifier::{AckEvent, RepeatEvent};
use crate::config::{CorrelationConfig, LogPaths};
use crate::error::Result;
use crate::store::JsonlLog;

/// What a sent message looked like before encryption
#[derive(Debug, Clone)]
pub struct SendFingerprint {
    /// Channel key
    pub secret: ChannelSecret,
    /// Sender timestamp embedded in the plaintext
    pub sender_timestamp: u32,
    /// Text type (0 for plain text)
    pub txt_type: u8,
    /// Message text
    pub text: String,
}

impl SendFingerprint {
    /// Attempt counter that reproduces `pkt_payload_hex`, if any
    pub fn verify(&self, pkt_payload_hex: &str) -> Option<u8> {
        let observed = hex::decode(pkt_payload_hex).ok()?;
        match_attempt(
            &self.secret,
            self.sender_timestamp,
            self.txt_type,
            &self.text,
            &observed,
        )
    }
}

#[derive(Debug, Clone)]
struct PendingSend {
    channel_idx: u8,
    timestamp: f64,
    registered_at: f64,
    fingerprint: Option<SendFingerprint>,
}

/// A locally sent message and the relay paths it was heard on
#[derive(Debug, Clone, PartialEq)]
pub struct EchoRecord {
    /// On-air payload, hex
    pub pkt_payload: String,
    /// Distinct relay paths, first-seen order
    pub paths: Vec<String>,
    /// Send timestamp as registered
    pub timestamp: f64,
    /// Channel the message went out on
    pub channel_idx: u8,
    /// When the first echo was heard
    pub first_seen: f64,
}

impl EchoRecord {
    fn add_path(&mut self, path: &str) -> bool {
        if self.paths.iter().any(|p| p == path) {
            return false;
        }
        self.paths.push(path.to_string());
        true
    }
}

/// One reception of a packet this node did not send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathObservation {
    /// Relay path, hex
    pub path: String,
    /// Hop count
    pub path_len: Option<u32>,
    /// Signal to noise ratio
    pub snr: Option<f64>,
    /// Observed at, Unix seconds
    pub ts: f64,
}

/// First-seen delivery acknowledgement for a code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRecord {
    /// ACK code
    pub code: String,
    /// Signal to noise ratio
    pub snr: Option<f64>,
    /// Route type name
    pub route: Option<String>,
    /// Relay path, hex
    #[serde(default)]
    pub path: String,
    /// Observed at, Unix seconds
    pub ts: f64,
}

/// Persisted echo log line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EchoLogRecord {
    Echo {
        pkt_payload: String,
        path: String,
        timestamp: f64,
        channel_idx: u8,
        ts: f64,
    },
    Rx {
        pkt_payload: String,
        path: String,
        path_len: Option<u32>,
        snr: Option<f64>,
        ts: f64,
    },
}

impl EchoLogRecord {
    fn ts(&self) -> f64 {
        match self {
            EchoLogRecord::Echo { ts, .. } | EchoLogRecord::Rx { ts, .. } => *ts,
        }
    }
}

/// How a repeat event was filed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatOutcome {
    /// Bound to the pending send, creating an echo record
    NewEcho,
    /// Matched a known echo; `added` is false for an already-seen path
    EchoPath { added: bool },
    /// Not ours: stored as an incoming-path observation
    Incoming,
}

/// How an ACK event was filed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First sighting of this code
    Recorded,
    /// Code already known, event discarded
    Duplicate,
}

/// Echo summary entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentEchoSummary {
    pub pkt_payload: String,
    pub packet_hash: Option<String>,
    pub analyzer_url: Option<String>,
    pub timestamp: f64,
    pub channel_idx: u8,
    pub count: usize,
    pub paths: Vec<String>,
}

/// Incoming-path summary entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPathSummary {
    pub pkt_payload: String,
    pub packet_hash: Option<String>,
    pub analyzer_url: Option<String>,
    pub paths: Vec<PathObservation>,
}

/// Everything the correlator knows, for the web front end
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoSummary {
    pub sent_echoes: Vec<SentEchoSummary>,
    pub incoming_paths: Vec<IncomingPathSummary>,
}

struct CorrelatorState {
    pending: Option<PendingSend>,
    echoes: HashMap<String, EchoRecord>,
    incoming: HashMap<String, Vec<PathObservation>>,
    acks: HashMap<String, AckRecord>,
    echo_log: JsonlLog,
    ack_log: JsonlLog,
}

/// Correlates overheard packets with locally sent traffic
pub struct PacketCorrelator {
    config: CorrelationConfig,
    state: Mutex<CorrelatorState>,
}

impl std::fmt::Debug for PacketCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PacketCorrelator")
            .field("echoes", &state.echoes.len())
            .field("incoming", &state.incoming.len())
            .field("acks", &state.acks.len())
            .field("pending", &state.pending.is_some())
            .finish()
    }
}

impl PacketCorrelator {
    /// Open the echo and ACK logs, replaying and compacting them
    pub fn open(paths: &LogPaths, config: CorrelationConfig) -> Result<Self> {
        let now = unix_now();
        let retention = config.retention;

        let echo_log = JsonlLog::new(&paths.echoes);
        let ack_log = JsonlLog::new(&paths.acks);

        let echo_records: Vec<EchoLogRecord> =
            echo_log.load_compacted(|r: &EchoLogRecord| !is_expired(r.ts(), now, retention))?;
        let ack_records: Vec<AckRecord> =
            ack_log.load_compacted(|r: &AckRecord| !is_expired(r.ts, now, retention))?;

        let mut state = CorrelatorState {
            pending: None,
            echoes: HashMap::new(),
            incoming: HashMap::new(),
            acks: HashMap::new(),
            echo_log,
            ack_log,
        };

        for record in echo_records {
            state.replay(record);
        }
        for ack in ack_records {
            state.merge_ack(ack);
        }

        info!(
            echoes = state.echoes.len(),
            incoming = state.incoming.len(),
            acks = state.acks.len(),
            "Loaded correlator state"
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Open a window for the next send on `channel_idx`
    pub fn register_pending_send(
        &self,
        channel_idx: u8,
        timestamp: f64,
        fingerprint: Option<SendFingerprint>,
    ) {
        self.register_pending_send_at(channel_idx, timestamp, fingerprint, unix_now());
    }

    fn register_pending_send_at(
        &self,
        channel_idx: u8,
        timestamp: f64,
        fingerprint: Option<SendFingerprint>,
        now: f64,
    ) {
        let mut state = self.state.lock();
        state.prune(now, &self.config);
        if state.pending.is_some() {
            debug!("Replacing unbound pending send");
        }
        debug!(
            channel_idx,
            timestamp,
            verified = fingerprint.is_some(),
            "Registered pending send"
        );
        state.pending = Some(PendingSend {
            channel_idx,
            timestamp,
            registered_at: now,
            fingerprint,
        });
    }

    /// File an overheard group-text repeat
    pub fn on_repeat(&self, event: &RepeatEvent) -> RepeatOutcome {
        self.on_repeat_at(event, unix_now())
    }

    fn on_repeat_at(&self, event: &RepeatEvent, now: f64) -> RepeatOutcome {
        let mut state = self.state.lock();
        let state = &mut *state;

        if let Some(echo) = state.echoes.get_mut(&event.pkt_payload) {
            let added = echo.add_path(&event.path);
            if added {
                let record = EchoLogRecord::Echo {
                    pkt_payload: event.pkt_payload.clone(),
                    path: event.path.clone(),
                    timestamp: echo.timestamp,
                    channel_idx: echo.channel_idx,
                    ts: now,
                };
                debug!(paths = echo.paths.len(), "Echo heard on new path");
                persist(&state.echo_log, &record);
            }
            return RepeatOutcome::EchoPath { added };
        }

        if let Some(pending) = state.pending.take() {
            let window = self.config.echo_window.as_secs_f64();
            let in_window = now - pending.registered_at <= window;
            let verified = match &pending.fingerprint {
                Some(fp) => match fp.verify(&event.pkt_payload) {
                    Some(attempt) => {
                        debug!(attempt, "Repeat matches reconstructed ciphertext");
                        true
                    }
                    None => false,
                },
                None => true,
            };

            if in_window && verified {
                let echo = EchoRecord {
                    pkt_payload: event.pkt_payload.clone(),
                    paths: vec![event.path.clone()],
                    timestamp: pending.timestamp,
                    channel_idx: pending.channel_idx,
                    first_seen: now,
                };
                let record = EchoLogRecord::Echo {
                    pkt_payload: echo.pkt_payload.clone(),
                    path: event.path.clone(),
                    timestamp: echo.timestamp,
                    channel_idx: echo.channel_idx,
                    ts: now,
                };
                info!(
                    channel_idx = echo.channel_idx,
                    timestamp = echo.timestamp,
                    "Bound first echo of sent message"
                );
                state.echoes.insert(echo.pkt_payload.clone(), echo);
                persist(&state.echo_log, &record);
                return RepeatOutcome::NewEcho;
            }

            if in_window {
                // Unverified repeat inside the window: keep waiting for ours
                state.pending = Some(pending);
            } else {
                debug!("Pending send window expired");
            }
        }

        let observation = PathObservation {
            path: event.path.clone(),
            path_len: event.path_len,
            snr: event.snr,
            ts: now,
        };
        let record = EchoLogRecord::Rx {
            pkt_payload: event.pkt_payload.clone(),
            path: observation.path.clone(),
            path_len: observation.path_len,
            snr: observation.snr,
            ts: now,
        };
        state
            .incoming
            .entry(event.pkt_payload.clone())
            .or_default()
            .push(observation);
        persist(&state.echo_log, &record);
        RepeatOutcome::Incoming
    }

    /// File an overheard delivery acknowledgement
    pub fn on_ack(&self, event: &AckEvent) -> AckOutcome {
        self.on_ack_at(event, unix_now())
    }

    fn on_ack_at(&self, event: &AckEvent, now: f64) -> AckOutcome {
        let mut state = self.state.lock();
        if state.acks.contains_key(&event.code) {
            debug!(code = %event.code, "Duplicate ACK discarded");
            return AckOutcome::Duplicate;
        }
        let record = AckRecord {
            code: event.code.clone(),
            snr: event.snr,
            route: event.route.clone(),
            path: event.path.clone(),
            ts: now,
        };
        info!(code = %record.code, route = ?record.route, "ACK received");
        persist(&state.ack_log, &record);
        state.acks.insert(record.code.clone(), record);
        AckOutcome::Recorded
    }

    /// Number of distinct paths a sent message was heard on.
    ///
    /// Matches on channel and a send timestamp within the match window;
    /// the closest timestamp wins.
    pub fn query_echo_count(&self, timestamp: f64, channel_idx: u8) -> usize {
        let window = self.config.echo_match_window.as_secs_f64();
        let state = self.state.lock();
        state
            .echoes
            .values()
            .filter(|e| e.channel_idx == channel_idx)
            .map(|e| ((e.timestamp - timestamp).abs(), e))
            .filter(|(delta, _)| *delta < window)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, e)| e.paths.len())
            .unwrap_or(0)
    }

    /// Snapshot of sent echoes and incoming paths
    pub fn summary(&self) -> EchoSummary {
        let state = self.state.lock();

        let mut sent: Vec<&EchoRecord> = state.echoes.values().collect();
        sent.sort_by(|a, b| a.first_seen.total_cmp(&b.first_seen));
        let sent_echoes = sent
            .into_iter()
            .map(|e| SentEchoSummary {
                pkt_payload: e.pkt_payload.clone(),
                packet_hash: hash_of(&e.pkt_payload),
                analyzer_url: analyzer_url(&e.pkt_payload),
                timestamp: e.timestamp,
                channel_idx: e.channel_idx,
                count: e.paths.len(),
                paths: e.paths.clone(),
            })
            .collect();

        let mut incoming: Vec<(&String, &Vec<PathObservation>)> = state.incoming.iter().collect();
        incoming.sort_by(|a, b| first_ts(a.1).total_cmp(&first_ts(b.1)));
        let incoming_paths = incoming
            .into_iter()
            .map(|(payload, paths)| IncomingPathSummary {
                pkt_payload: payload.clone(),
                packet_hash: hash_of(payload),
                analyzer_url: analyzer_url(payload),
                paths: paths.clone(),
            })
            .collect();

        EchoSummary {
            sent_echoes,
            incoming_paths,
        }
    }

    /// Look up ACK records by code; unknown codes map to `None`
    pub fn ack_status<S: AsRef<str>>(&self, codes: &[S]) -> BTreeMap<String, Option<AckRecord>> {
        let state = self.state.lock();
        codes
            .iter()
            .map(|code| {
                let code = code.as_ref();
                (code.to_string(), state.acks.get(code).cloned())
            })
            .collect()
    }

    /// Whether a send window is currently open
    pub fn has_pending_send(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Move both logs to the files for a new device name.
    ///
    /// Files already present under the new name are compacted and merged
    /// into the in-memory state, so records from earlier runs survive.
    pub fn retarget(&self, paths: &LogPaths) -> Result<()> {
        let now = unix_now();
        let retention = self.config.retention;
        let mut state = self.state.lock();

        if state.echo_log.retarget(&paths.echoes)? {
            let records: Vec<EchoLogRecord> = state
                .echo_log
                .load_compacted(|r: &EchoLogRecord| !is_expired(r.ts(), now, retention))?;
            debug!(records = records.len(), "Merging existing echo log");
            for record in records {
                state.replay(record);
            }
        }
        if state.ack_log.retarget(&paths.acks)? {
            let acks: Vec<AckRecord> = state
                .ack_log
                .load_compacted(|r: &AckRecord| !is_expired(r.ts, now, retention))?;
            debug!(acks = acks.len(), "Merging existing ACK log");
            for ack in acks {
                state.merge_ack(ack);
            }
        }
        Ok(())
    }

    /// Current echo log path
    pub fn echo_log_path(&self) -> std::path::PathBuf {
        self.state.lock().echo_log.path().to_path_buf()
    }

    /// Current ACK log path
    pub fn ack_log_path(&self) -> std::path::PathBuf {
        self.state.lock().ack_log.path().to_path_buf()
    }
}

impl CorrelatorState {
    fn replay(&mut self, record: EchoLogRecord) {
        match record {
            EchoLogRecord::Echo {
                pkt_payload,
                path,
                timestamp,
                channel_idx,
                ts,
            } => {
                let echo = self
                    .echoes
                    .entry(pkt_payload.clone())
                    .or_insert_with(|| EchoRecord {
                        pkt_payload,
                        paths: Vec::new(),
                        timestamp,
                        channel_idx,
                        first_seen: ts,
                    });
                echo.add_path(&path);
            }
            EchoLogRecord::Rx {
                pkt_payload,
                path,
                path_len,
                snr,
                ts,
            } => {
                self.incoming
                    .entry(pkt_payload)
                    .or_default()
                    .push(PathObservation {
                        path,
                        path_len,
                        snr,
                        ts,
                    });
            }
        }
    }

    /// Keep the earliest sighting of each ACK code
    fn merge_ack(&mut self, ack: AckRecord) {
        match self.acks.get(&ack.code) {
            Some(known) if known.ts <= ack.ts => {}
            _ => {
                self.acks.insert(ack.code.clone(), ack);
            }
        }
    }

    fn prune(&mut self, now: f64, config: &CorrelationConfig) {
        let retention = config.retention;
        self.echoes
            .retain(|_, e| !is_expired(e.first_seen, now, retention));
        self.incoming.retain(|_, paths| {
            paths.retain(|p| !is_expired(p.ts, now, retention));
            !paths.is_empty()
        });
        self.acks.retain(|_, a| !is_expired(a.ts, now, retention));
    }
}

fn persist<T: Serialize>(log: &JsonlLog, record: &T) {
    if let Err(e) = log.append(record) {
        warn!(path = %log.path().display(), error = %e, "Failed to persist record");
    }
}

fn hash_of(pkt_payload_hex: &str) -> Option<String> {
    hex::decode(pkt_payload_hex).ok().map(|raw| packet_hash(&raw))
}

fn first_ts(paths: &[PathObservation]) -> f64 {
    paths.first().map(|p| p.ts).unwrap_or(0.0)
}
