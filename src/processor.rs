//! Turns one descriptor file into one validated execution, one result-log
//! line and, on completion, one archived file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::{debug, info, warn};

use crate::descriptor::{CommandDescriptor, DescriptorError};
use crate::error::LinkError;
use crate::exec::{ExecOptions, ExecutionResult, Executor, OutputChunk};
use crate::logging::{ProcessingRecord, ResultLogger};
use crate::policy::CommandPolicy;

/// Which file names are descriptors. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatterns {
    pub suffixes: Vec<String>,
    pub prefixes: Vec<String>,
}

impl FilePatterns {
    pub fn matches(&self, name: &str) -> bool {
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
            || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

impl Default for FilePatterns {
    fn default() -> Self {
        Self {
            suffixes: vec![".claude.json".to_string()],
            prefixes: vec!["claude-cmd-".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub archive_dir: PathBuf,
    pub log_file: PathBuf,
    pub patterns: FilePatterns,
    pub exec: ExecOptions,
}

/// Operator confirmation consulted before a descriptor runs.
pub trait Approver: Send + Sync {
    fn approve(&self, descriptor: &CommandDescriptor) -> bool;
}

/// Receives every output chunk as it arrives.
pub type OutputObserver = Box<dyn Fn(&OutputChunk) + Send + Sync>;

#[derive(Debug)]
pub enum ProcessingOutcome {
    /// Name does not match the descriptor patterns.
    Skipped,
    ParseError(String),
    NoCommand,
    Declined,
    Completed {
        result: ExecutionResult,
        archived_to: PathBuf,
    },
}

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Unix millis, bumped so that no two calls in this process return the same
/// value.
fn next_stamp() -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        other => other,
    }
}

pub struct FileProcessor {
    settings: ProcessorSettings,
    executor: Executor,
    logger: ResultLogger,
    approver: Option<Box<dyn Approver>>,
    observer: Option<OutputObserver>,
}

impl FileProcessor {
    /// Create the archive directory and open the result log.
    pub fn new(
        settings: ProcessorSettings,
        policy: Arc<dyn CommandPolicy>,
    ) -> Result<Self, LinkError> {
        fs::create_dir_all(&settings.archive_dir).map_err(|source| LinkError::CreateDir {
            path: settings.archive_dir.clone(),
            source,
        })?;
        let logger = ResultLogger::open(&settings.log_file)?;
        Ok(Self {
            settings,
            executor: Executor::new(policy),
            logger,
            approver: None,
            observer: None,
        })
    }

    pub fn with_approver(mut self, approver: Box<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_output(mut self, observer: OutputObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn patterns(&self) -> &FilePatterns {
        &self.settings.patterns
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    fn record(&self, record: &ProcessingRecord) {
        if let Err(e) = self.logger.append(record) {
            warn!("{e}");
        }
    }

    /// Process one file. Only an archive failure is an `Err`; everything
    /// else is an outcome and a result-log line.
    pub fn process(&self, path: &Path) -> Result<ProcessingOutcome, LinkError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(ProcessingOutcome::Skipped);
        };
        if !self.settings.patterns.matches(name) {
            debug!("ignoring {name}");
            return Ok(ProcessingOutcome::Skipped);
        }

        let descriptor = match CommandDescriptor::read(path) {
            Ok(d) => d,
            Err(DescriptorError::MissingCommand) => {
                warn!("{name}: no command found");
                self.record(&ProcessingRecord::failure(name, "No command found"));
                return Ok(ProcessingOutcome::NoCommand);
            }
            Err(e) => {
                let message = e.to_string();
                warn!("{name}: {message}");
                self.record(&ProcessingRecord::failure(name, message.as_str()));
                return Ok(ProcessingOutcome::ParseError(message));
            }
        };

        info!(
            "{name}: {} (id {}, from {})",
            descriptor.description, descriptor.id, descriptor.source
        );
        info!("$ {}", descriptor.command);

        if let Some(approver) = &self.approver
            && !approver.approve(&descriptor)
        {
            info!("{name}: declined");
            let mut record = ProcessingRecord::failure(name, "Declined by operator");
            record.id = Some(descriptor.id.clone());
            record.command = Some(descriptor.command.clone());
            self.record(&record);
            return Ok(ProcessingOutcome::Declined);
        }

        let mut execution = self.executor.spawn(&descriptor.command, &self.settings.exec);
        for chunk in execution.by_ref() {
            if let Some(observer) = &self.observer {
                observer(&chunk);
            }
        }
        let result = execution.wait();

        match &result.error {
            Some(e) => warn!("{name}: {e}"),
            None => info!(
                "{name}: exit {} in {}ms",
                result
                    .exit_code
                    .map_or_else(|| "?".to_string(), |c| c.to_string()),
                result.duration_ms
            ),
        }

        self.record(&ProcessingRecord {
            timestamp: Utc::now(),
            file: name.to_string(),
            id: Some(descriptor.id.clone()),
            command: Some(descriptor.command.clone()),
            exit_code: result.exit_code,
            duration_ms: Some(result.duration_ms),
            success: result.success,
            error: result.error.as_ref().map(ToString::to_string),
        });

        let archived_to = self.archive(path, name)?;
        debug!("archived {name} to {}", archived_to.display());
        Ok(ProcessingOutcome::Completed {
            result,
            archived_to,
        })
    }

    fn archive(&self, path: &Path, name: &str) -> Result<PathBuf, LinkError> {
        let dest = self
            .settings
            .archive_dir
            .join(format!("{}-{name}", next_stamp()));
        move_file(path, &dest).map_err(|source| LinkError::Archive {
            file: path.to_path_buf(),
            dest: dest.clone(),
            source,
        })?;
        Ok(dest)
    }
}
