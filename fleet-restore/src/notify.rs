//! Upstream error channel.
//!
//! Only failures that stop a restore before it can start (unreadable
//! archive, no install root) are reported here; everything else lands in
//! the [`RunReport`](crate::report::RunReport).

use chrono::{DateTime, Utc};
use fleet_core::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;

pub trait ErrorReporter: Send + Sync {
    fn build_error(&self, message: &str) -> Result<()>;
}

/// Reports through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn build_error(&self, message: &str) -> Result<()> {
        error!(target: "fleet_restore::notify", "build error: {}", message);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Appends one JSON object per report to a file.
#[derive(Debug)]
pub struct JsonLinesReporter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ErrorReporter for JsonLinesReporter {
    fn build_error(&self, message: &str) -> Result<()> {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            level: "error".to_string(),
            message: message.to_string(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| FleetError::Internal("error report lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetError::filesystem(e, parent, "create_dir_all"))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| FleetError::filesystem(e, &self.path, "open"))?;
        file.write_all(line.as_bytes())
            .map_err(|e| FleetError::filesystem(e, &self.path, "write"))?;
        Ok(())
    }
}
