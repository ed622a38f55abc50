//! claudelink: run shell commands dropped into a directory as JSON
//! descriptor files, after checking them against a deny-list.
//!
//! A descriptor (`*.claude.json` or `claude-cmd-*`) names one command. The
//! watcher picks it up, the policy decides whether it may run, the executor
//! runs it with a timeout, the result is appended to a JSON lines log and the
//! file is moved to an archive directory so it never runs twice.
//!
//! # Architecture
//!
//! - **[`parse`]**: quote-aware shell splitting, substitutions, redirections.
//! - **[`policy`]**: [`CommandPolicy`](policy::CommandPolicy) and the default
//!   [`DenyListPolicy`](policy::DenyListPolicy) built from ordered deny rules.
//! - **[`descriptor`]**: descriptor file parsing and normalization.
//! - **[`exec`]**: subprocess execution with streamed output and timeout.
//! - **[`processor`]**: one file in, one log record out, file archived.
//! - **[`watch`]**: directory events, backlog scan, single-flight dispatch.
//! - **[`config`]**: embedded defaults + user overlay merge.
//! - **[`logging`]**: result log and diagnostics setup.

/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Command descriptor parsing.
pub mod descriptor;
/// Error types surfaced to callers.
pub mod error;
/// Command execution.
pub mod exec;
/// Result log and diagnostic logger.
pub mod logging;
/// Shell command parsing helpers.
pub mod parse;
/// Command validation.
pub mod policy;
/// Per-file processing pipeline.
pub mod processor;
/// Directory watching.
pub mod watch;

use policy::{CommandPolicy, DenyListPolicy, ValidationResult};

/// Check a command against the default deny-list.
///
/// For user configuration build a [`DenyListPolicy`] from
/// [`Config`](config::Config) instead.
pub fn validate(command: &str) -> ValidationResult {
    DenyListPolicy::default().evaluate(command)
}
