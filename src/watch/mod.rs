//! Directory watching: backlog scan, event dispatch, single-flight
//! processing per file name.

mod inflight;
mod source;

pub use inflight::{InFlightGuard, InFlightSet};
#[cfg(target_os = "linux")]
pub use source::InotifySource;
pub use source::{ChannelSource, EventSource, PollingSource, platform_source};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::LinkError;
use crate::processor::{FileProcessor, ProcessingOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    pub watch_dir: PathBuf,
    /// Pause between an event and processing, so writers can finish.
    pub settle_delay: Duration,
    /// Only used by [`PollingSource`].
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct DirectoryWatcher {
    settings: WatcherSettings,
    processor: Arc<FileProcessor>,
    in_flight: InFlightSet,
}

impl DirectoryWatcher {
    pub fn new(settings: WatcherSettings, processor: Arc<FileProcessor>) -> Self {
        Self {
            settings,
            processor,
            in_flight: InFlightSet::new(),
        }
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Dispatch every matching file already in the directory, in name order.
    pub fn scan_existing(&self) -> Result<Vec<JoinHandle<()>>, LinkError> {
        let patterns = self.processor.patterns();
        let names = source::list_files(&self.settings.watch_dir)?;
        let backlog: Vec<String> = names.into_iter().filter(|n| patterns.matches(n)).collect();
        if !backlog.is_empty() {
            info!("found {} pending file(s)", backlog.len());
        }
        Ok(backlog.iter().filter_map(|name| self.dispatch(name)).collect())
    }

    /// Process `name` on a worker thread unless it is already in flight.
    pub fn dispatch(&self, name: &str) -> Option<JoinHandle<()>> {
        let guard = self.claim(name)?;
        let path = self.settings.watch_dir.join(name);
        let processor = Arc::clone(&self.processor);
        Some(thread::spawn(move || process_claimed(&guard, &path, &processor)))
    }

    /// Handle one notifier event: claim the name, settle, then process.
    ///
    /// The name is held from the moment the event arrives, so the several
    /// events a single write produces lead to one processing run.
    pub fn notify(&self, name: &str) -> Option<JoinHandle<()>> {
        if !self.processor.patterns().matches(name) {
            return None;
        }
        let guard = self.claim(name)?;
        let path = self.settings.watch_dir.join(name);
        let processor = Arc::clone(&self.processor);
        let settle = self.settings.settle_delay;
        Some(thread::spawn(move || {
            thread::sleep(settle);
            process_claimed(&guard, &path, &processor);
        }))
    }

    fn claim(&self, name: &str) -> Option<InFlightGuard> {
        let guard = self.in_flight.try_acquire(name);
        if guard.is_none() {
            debug!("{name} already in flight");
        }
        guard
    }

    /// Process the backlog, then every event until `source` closes.
    pub fn run(&self, source: &mut dyn EventSource) -> Result<(), LinkError> {
        let mut workers = self.scan_existing()?;
        info!("watching {}", self.settings.watch_dir.display());

        while let Some(batch) = source.next_batch()? {
            workers.retain(|w| !w.is_finished());
            for name in batch {
                workers.extend(self.notify(&name));
            }
        }

        debug!("event source closed, waiting for {} worker(s)", workers.len());
        for worker in workers {
            if worker.join().is_err() {
                error!("worker panicked");
            }
        }
        Ok(())
    }
}

/// Process the file the caller holds the in-flight claim for.
fn process_claimed(guard: &InFlightGuard, path: &Path, processor: &FileProcessor) {
    let name = guard.name();
    if !path.exists() {
        debug!("{name} is gone");
        return;
    }
    match processor.process(path) {
        Ok(outcome) => log_outcome(name, &outcome),
        Err(e) => error!("{e}"),
    }
}

fn log_outcome(name: &str, outcome: &ProcessingOutcome) {
    match outcome {
        ProcessingOutcome::Skipped => debug!("{name}: skipped"),
        ProcessingOutcome::ParseError(message) => warn!("{name} left in place: {message}"),
        ProcessingOutcome::NoCommand => warn!("{name} left in place: no command"),
        ProcessingOutcome::Declined => info!("{name} left in place: declined"),
        ProcessingOutcome::Completed { result, archived_to } => info!(
            "{name} {} -> {}",
            if result.success { "succeeded" } else { "failed" },
            archived_to.display()
        ),
    }
}
