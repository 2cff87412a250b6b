//! Advert log
//!
//! Adverts are stored as the device printed them plus a `ts` field, and a
//! `decoded` object when the raw payload parses.

use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use meshlink_core::{decode_advert_hex, is_expired, unix_now};

use crate::error::Result;
use crate::store::JsonlLog;

/// Append-only log of overheard adverts
#[derive(Debug)]
pub struct AdvertLog {
    log: Mutex<JsonlLog>,
    retention: Duration,
}

/// Drop expired or unstamped adverts from `log`, returning how many remain
fn compact(log: &JsonlLog, retention: Duration) -> Result<usize> {
    let now = unix_now();
    let kept: Vec<Value> = log.load_compacted(|record: &Value| {
        record
            .get("ts")
            .and_then(Value::as_f64)
            .map(|ts| !is_expired(ts, now, retention))
            .unwrap_or(false)
    })?;
    Ok(kept.len())
}

impl AdvertLog {
    /// Open the log, dropping records older than `retention`
    pub fn open(path: impl Into<PathBuf>, retention: Duration) -> Result<Self> {
        let log = JsonlLog::new(path);
        let kept = compact(&log, retention)?;
        debug!(path = %log.path().display(), adverts = kept, "Loaded advert log");
        Ok(Self {
            log: Mutex::new(log),
            retention,
        })
    }

    /// Stamp and append an advert event
    pub fn record(&self, advert: Value) {
        self.record_at(advert, unix_now());
    }

    fn record_at(&self, mut advert: Value, now: f64) {
        let Some(obj) = advert.as_object_mut() else {
            debug!("Ignoring non-object advert");
            return;
        };
        obj.insert("ts".to_string(), Value::from(now));

        let decoded = obj
            .get("pkt_payload")
            .and_then(Value::as_str)
            .and_then(decode_advert_hex);
        if let Some(info) = decoded {
            debug!(name = ?info.name, public_key = %info.public_key, "Advert decoded");
            match serde_json::to_value(&info) {
                Ok(v) => {
                    obj.insert("decoded".to_string(), v);
                }
                Err(e) => debug!(error = %e, "Failed to encode decoded advert"),
            }
        }

        let log = self.log.lock();
        if let Err(e) = log.append(&advert) {
            warn!(path = %log.path().display(), error = %e, "Failed to log advert");
        }
    }

    /// Current file path
    pub fn path(&self) -> PathBuf {
        self.log.lock().path().to_path_buf()
    }

    /// Move the log to a new file, compacting one left by an earlier run
    pub fn retarget(&self, path: &Path) -> Result<()> {
        let mut log = self.log.lock();
        if log.retarget(path)? {
            let kept = compact(&log, self.retention)?;
            debug!(path = %path.display(), adverts = kept, "Adopted existing advert log");
        }
        Ok(())
    }
}
