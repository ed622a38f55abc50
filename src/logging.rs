//! Two logging channels: the append-only result log (one JSON object per
//! line, one line per processed file) and diagnostics on stderr through the
//! `log` facade.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::LevelFilter;
use serde::Serialize;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use crate::error::LinkError;

/// One processed file. Optional fields are omitted from the JSON line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub timestamp: DateTime<Utc>,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingRecord {
    /// A record for a file that never reached execution.
    pub fn failure(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            file: file.into(),
            id: None,
            command: None,
            exit_code: None,
            duration_ms: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Append-only JSON lines writer, shared between worker threads.
pub struct ResultLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl ResultLogger {
    /// Open (creating if needed) the log file and its parent directory.
    pub fn open(path: &Path) -> Result<Self, LinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LinkError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LinkError::Log {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &ProcessingRecord) -> Result<(), LinkError> {
        let mut line = serde_json::to_vec(record).map_err(|e| LinkError::Log {
            path: self.path.clone(),
            source: e.into(),
        })?;
        line.push(b'\n');

        // A single write_all under the lock keeps lines from interleaving.
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line).map_err(|source| LinkError::Log {
            path: self.path.clone(),
            source,
        })
    }
}

/// Route `log` macros to stderr. Safe to call more than once; later calls
/// are ignored.
pub fn init_diagnostics(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}
