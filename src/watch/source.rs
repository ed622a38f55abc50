//! Where file-arrival events come from.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::LinkError;

/// A stream of batches of file names (relative to the watched directory).
pub trait EventSource: Send {
    /// Block until names are available. `Ok(None)` means the source closed.
    fn next_batch(&mut self) -> Result<Option<Vec<String>>, LinkError>;
}

/// Names of regular files directly inside `dir`.
pub(crate) fn list_files(dir: &Path) -> Result<BTreeSet<String>, LinkError> {
    let watch_err = |source| LinkError::Watch {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(dir).map_err(watch_err)? {
        let entry = entry.map_err(watch_err)?;
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

/// Kernel notifications for files created in, moved into, or finished
/// writing in one directory.
#[cfg(target_os = "linux")]
pub struct InotifySource {
    dir: PathBuf,
    inotify: nix::sys::inotify::Inotify,
}

#[cfg(target_os = "linux")]
impl InotifySource {
    pub fn open(dir: &Path) -> Result<Self, LinkError> {
        use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};

        let inotify = Inotify::init(InitFlags::IN_CLOEXEC)
            .map_err(|e| LinkError::Notifier(format!("inotify init failed: {e}")))?;
        let mask = AddWatchFlags::IN_CREATE
            | AddWatchFlags::IN_MOVED_TO
            | AddWatchFlags::IN_CLOSE_WRITE;
        inotify
            .add_watch(dir, mask)
            .map_err(|e| LinkError::Watch {
                path: dir.to_path_buf(),
                source: std::io::Error::from(e),
            })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            inotify,
        })
    }
}

#[cfg(target_os = "linux")]
impl EventSource for InotifySource {
    fn next_batch(&mut self) -> Result<Option<Vec<String>>, LinkError> {
        use nix::errno::Errno;
        use nix::sys::inotify::AddWatchFlags;

        loop {
            let events = match self.inotify.read_events() {
                Ok(events) => events,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(LinkError::Notifier(format!("inotify read failed: {e}"))),
            };

            if events.iter().any(|e| e.mask.contains(AddWatchFlags::IN_Q_OVERFLOW)) {
                warn!("inotify queue overflow, rescanning {}", self.dir.display());
                return list_files(&self.dir).map(|names| Some(names.into_iter().collect()));
            }

            let names: Vec<String> = events
                .into_iter()
                .filter(|e| !e.mask.contains(AddWatchFlags::IN_ISDIR))
                .filter_map(|e| e.name)
                .filter_map(|n| n.into_string().ok())
                .collect();
            if !names.is_empty() {
                return Ok(Some(names));
            }
        }
    }
}

/// Directory listing diffed against the previous one every `interval`.
pub struct PollingSource {
    dir: PathBuf,
    interval: Duration,
    seen: BTreeSet<String>,
}

impl PollingSource {
    /// Files present now are treated as already seen.
    pub fn new(dir: &Path, interval: Duration) -> Result<Self, LinkError> {
        Ok(Self {
            dir: dir.to_path_buf(),
            interval,
            seen: list_files(dir)?,
        })
    }
}

impl EventSource for PollingSource {
    fn next_batch(&mut self) -> Result<Option<Vec<String>>, LinkError> {
        loop {
            thread::sleep(self.interval);
            let current = list_files(&self.dir)?;
            let fresh: Vec<String> = current.difference(&self.seen).cloned().collect();
            self.seen = current;
            if !fresh.is_empty() {
                debug!("poll found {} new file(s)", fresh.len());
                return Ok(Some(fresh));
            }
        }
    }
}

/// Names pushed by another thread; closes when every sender is dropped.
pub struct ChannelSource {
    rx: Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }
}

impl EventSource for ChannelSource {
    fn next_batch(&mut self) -> Result<Option<Vec<String>>, LinkError> {
        let Ok(first) = self.rx.recv() else {
            return Ok(None);
        };
        let mut batch = vec![first];
        batch.extend(self.rx.try_iter());
        Ok(Some(batch))
    }
}

/// The best available source for this platform.
pub fn platform_source(
    dir: &Path,
    poll_interval: Duration,
) -> Result<Box<dyn EventSource>, LinkError> {
    #[cfg(target_os = "linux")]
    {
        let _ = poll_interval;
        Ok(Box::new(InotifySource::open(dir)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(Box::new(PollingSource::new(dir, poll_interval)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn list_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.claude.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub.claude.json")).unwrap();
        let names: Vec<_> = list_files(dir.path()).unwrap().into_iter().collect();
        assert_eq!(names, ["a.txt", "b.claude.json"]);
    }

    #[test]
    fn list_missing_directory_is_watch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, LinkError::Watch { .. }));
    }

    #[test]
    fn polling_reports_only_new_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.claude.json"), "{}").unwrap();
        let mut source = PollingSource::new(dir.path(), Duration::from_millis(10)).unwrap();

        std::fs::write(dir.path().join("new.claude.json"), "{}").unwrap();
        let batch = source.next_batch().unwrap().unwrap();
        assert_eq!(batch, ["new.claude.json"]);
    }

    #[test]
    fn polling_reports_recreated_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.claude.json");
        std::fs::write(&path, "{}").unwrap();
        let mut source = PollingSource::new(dir.path(), Duration::from_millis(10)).unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        assert_eq!(source.next_batch().unwrap().unwrap(), ["marker"]);

        std::fs::write(&path, "{}").unwrap();
        assert_eq!(source.next_batch().unwrap().unwrap(), ["x.claude.json"]);
    }

    #[test]
    fn channel_source_batches_and_closes() {
        let (tx, rx) = mpsc::channel();
        let mut source = ChannelSource::new(rx);
        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();
        assert_eq!(source.next_batch().unwrap().unwrap(), ["a", "b"]);
        drop(tx);
        assert!(source.next_batch().unwrap().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn inotify_reports_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = InotifySource::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("hello.claude.json"), "{}").unwrap();
        let batch = source.next_batch().unwrap().unwrap();
        assert!(batch.iter().all(|n| n == "hello.claude.json"));
    }
}
