//! Errors that surface outside a single command execution.
//!
//! Per-command failures (blocked, spawn, timeout) live in
//! [`ExecError`](crate::exec::ExecError) and descriptor problems in
//! [`DescriptorError`](crate::descriptor::DescriptorError); both end up in the
//! result log. The variants here are the ones a caller has to act on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The processed file could not be moved out of the watch directory.
    /// Left unhandled this re-runs the command on the next scan.
    #[error("failed to archive {} to {}: {source}", .file.display(), .dest.display())]
    Archive {
        file: PathBuf,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to append to result log {}: {source}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file notifier failed: {0}")]
    Notifier(String),
}
