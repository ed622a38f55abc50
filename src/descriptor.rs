//! Command descriptor files: JSON objects naming one shell command.
//!
//! Recognized fields: `command` / `cmd` / `script` (first non-empty string
//! wins), `description` / `desc`, `id`, `timestamp` (RFC 3339), `source`.
//! Anything else is ignored.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("cannot read descriptor: {0}")]
    Read(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("descriptor must be a JSON object")]
    NotAnObject,

    #[error("No command found")]
    MissingCommand,
}

/// Field layout as written by producers, before normalization.
#[derive(Debug, Default, Deserialize)]
struct RawDescriptor {
    command: Option<String>,
    cmd: Option<String>,
    script: Option<String>,
    description: Option<String>,
    desc: Option<String>,
    id: Option<String>,
    timestamp: Option<String>,
    source: Option<String>,
}

fn first_non_empty(candidates: [Option<String>; 3]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

/// A normalized, immutable command descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub command: String,
    pub description: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl CommandDescriptor {
    /// Read and parse a descriptor file.
    pub fn read(path: &Path) -> Result<Self, DescriptorError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Parse descriptor bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        if !value.is_object() {
            return Err(DescriptorError::NotAnObject);
        }
        let raw: RawDescriptor = serde_json::from_value(value)?;

        let command = first_non_empty([raw.command, raw.cmd, raw.script])
            .ok_or(DescriptorError::MissingCommand)?;
        let description = [raw.description, raw.desc]
            .into_iter()
            .flatten()
            .find(|d| !d.is_empty())
            .unwrap_or_else(|| "No description".to_string());
        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let timestamp = raw
            .timestamp
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let source = raw
            .source
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            command,
            description,
            id,
            timestamp,
            source,
        })
    }
}
