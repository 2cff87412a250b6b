//! Append-only JSONL record files
//!
//! Each radio log is one JSON object per line. Records are appended as they
//! happen and the whole file is rewritten once at startup with expired or
//! unreadable lines dropped.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;

/// A newline-delimited JSON record file
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    /// Wrap a path; nothing is touched until the first read or write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Current file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Load all records that pass `keep`, rewriting the file if anything
    /// was dropped.
    pub fn load_compacted<T, F>(&self, keep: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Serialize,
        F: Fn(&T) -> bool,
    {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) if keep(&record) => kept.push(record),
                Ok(_) => dropped += 1,
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "Skipping unreadable record");
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            self.rewrite(&kept)?;
            info!(
                path = %self.path.display(),
                kept = kept.len(),
                dropped,
                "Compacted record log"
            );
        }
        Ok(kept)
    }

    /// Replace the file contents with `records`
    pub fn rewrite<T: Serialize>(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for record in records {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
            }
            file.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Point the log at `new_path`, moving the existing file along.
    ///
    /// An existing file at `new_path` wins and the old file is left alone.
    /// Returns true in that case so the caller can replay the adopted file.
    pub fn retarget(&mut self, new_path: impl Into<PathBuf>) -> Result<bool> {
        let new_path = new_path.into();
        if new_path == self.path {
            return Ok(false);
        }
        let adopted = new_path.exists();
        if adopted {
            if self.path.exists() {
                warn!(
                    from = %self.path.display(),
                    to = %new_path.display(),
                    "Target log already exists, not renaming"
                );
            }
        } else if self.path.exists() {
            fs::rename(&self.path, &new_path)?;
            info!(
                from = %self.path.display(),
                to = %new_path.display(),
                "Renamed record log"
            );
        }
        self.path = new_path;
        Ok(adopted)
    }
}
