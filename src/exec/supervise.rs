use std::io::Read;
use std::process::{Child, ExitStatus};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{ExecError, ExecutionResult, OutputChunk, elapsed_ms};

pub(super) const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_BUFFER: usize = 4096;
/// How long readers get to hit EOF after the process group was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Reader thread for one child pipe.
///
/// Bytes are accumulated raw and decoded once at the end, so multi-byte
/// characters split across reads survive in the aggregate.
pub(super) struct Capture {
    bytes: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl Capture {
    pub(super) fn start<R>(
        mut pipe: R,
        tx: Sender<OutputChunk>,
        wrap: fn(String) -> OutputChunk,
    ) -> Self
    where
        R: Read + Send + 'static,
    {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bytes);
        let handle = thread::spawn(move || {
            let mut buffer = [0u8; READ_BUFFER];
            loop {
                let n = match pipe.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("pipe read failed: {e}");
                        break;
                    }
                };
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&buffer[..n]);
                // The receiver may already be gone; keep draining regardless.
                let _ = tx.send(wrap(String::from_utf8_lossy(&buffer[..n]).into_owned()));
            }
        });
        Self { bytes, handle }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn into_text(self, join: bool) -> String {
        if join {
            let _ = self.handle.join();
        }
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).trim_end().to_string()
    }
}

/// SIGKILL the child's whole process group. Returns false if no signal
/// could be delivered.
#[cfg(unix)]
fn kill_group(pid: u32) -> bool {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => true,
        Err(errno) => {
            debug!("killpg({raw}) failed: {errno}");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> bool {
    false
}

fn signal_of(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

/// Wait for the child, enforcing `deadline`, then collect both streams.
pub(super) fn supervise(
    mut child: Child,
    stdout: Option<Capture>,
    stderr: Option<Capture>,
    start: Instant,
    deadline: Instant,
    timeout: Duration,
) -> ExecutionResult {
    let pid = child.id();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                warn!("command exceeded {}ms, killing process group {pid}", timeout.as_millis());
                if !kill_group(pid) {
                    let _ = child.kill();
                }
                let _ = child.wait();
                break Err(ExecError::Timeout { timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                if !kill_group(pid) {
                    let _ = child.kill();
                }
                let _ = child.wait();
                break Err(ExecError::Wait(e));
            }
        }
    };

    // Background jobs can keep the pipes open after the shell exits.
    let captures = [stdout.as_ref(), stderr.as_ref()];
    let pending = || captures.iter().flatten().any(|c| !c.is_finished());
    while pending() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    let mut drained = true;
    if pending() {
        debug!("output still open at deadline, killing process group {pid}");
        kill_group(pid);
        let grace = Instant::now() + DRAIN_GRACE;
        while pending() && Instant::now() < grace {
            thread::sleep(POLL_INTERVAL);
        }
        drained = !pending();
        if !drained {
            warn!("abandoning output readers for pid {pid}");
        }
    }

    let stdout = stdout.map(|c| c.into_text(drained)).unwrap_or_default();
    let stderr = stderr.map(|c| c.into_text(drained)).unwrap_or_default();
    let duration_ms = elapsed_ms(start);

    match status {
        Ok(status) => {
            let exit_code = status.code();
            let error = match (exit_code, signal_of(status)) {
                (None, Some(signal)) => Some(ExecError::Signal(signal)),
                _ => None,
            };
            debug!("pid {pid} exited with {status} after {duration_ms}ms");
            ExecutionResult {
                success: exit_code == Some(0),
                stdout,
                stderr,
                exit_code,
                duration_ms,
                error,
            }
        }
        Err(error) => ExecutionResult {
            success: false,
            stdout,
            stderr,
            exit_code: Some(-1),
            duration_ms,
            error: Some(error),
        },
    }
}
