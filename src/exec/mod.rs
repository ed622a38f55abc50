//! Shell command execution with streamed output and a hard timeout.
//!
//! Every command is re-validated through the [`CommandPolicy`] immediately
//! before spawning, whatever the caller already checked.

mod supervise;

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::policy::CommandPolicy;
use supervise::{Capture, POLL_INTERVAL, supervise};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Command blocked: {0}")]
    Blocked(String),

    #[error("failed to spawn {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: io::Error,
    },

    #[error("Command timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("Command killed by signal {0}")]
    Signal(i32),

    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),
}

/// Timeout applied when none (or zero) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to run a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Interpreter invoked as `<shell> -c <command>`.
    pub shell: String,
    /// `None` inherits the current working directory.
    pub working_dir: Option<PathBuf>,
    /// Added to (or overriding) the inherited environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// One read from a child pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

impl OutputChunk {
    pub fn text(&self) -> &str {
        match self {
            OutputChunk::Stdout(s) | OutputChunk::Stderr(s) => s,
        }
    }
}

/// Aggregate outcome of one command.
///
/// `exit_code` is `Some(-1)` when the command was blocked, failed to spawn or
/// timed out, and `None` when the child died from a signal.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub error: Option<ExecError>,
}

impl ExecutionResult {
    pub(crate) fn failed(error: ExecError, start: Instant) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(-1),
            duration_ms: elapsed_ms(start),
            error: Some(error),
        }
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

enum Completion {
    Ready(ExecutionResult),
    Pending(JoinHandle<ExecutionResult>),
}

/// A running (or already settled) command.
///
/// Iterating yields output chunks in arrival order until both pipes close
/// or the supervisor is done with the command, whichever comes first.
/// [`wait`](Execution::wait) returns the aggregate result; chunks not yet
/// consumed at that point are still part of `stdout` / `stderr`.
pub struct Execution {
    chunks: Option<Receiver<OutputChunk>>,
    leftover: VecDeque<OutputChunk>,
    completion: Completion,
}

impl Execution {
    fn settled(result: ExecutionResult) -> Self {
        Self {
            chunks: None,
            leftover: VecDeque::new(),
            completion: Completion::Ready(result),
        }
    }

    fn supervisor_finished(&self) -> bool {
        match &self.completion {
            Completion::Ready(_) => true,
            Completion::Pending(handle) => handle.is_finished(),
        }
    }

    pub fn wait(self) -> ExecutionResult {
        let Execution { chunks, completion, .. } = self;
        drop(chunks);
        match completion {
            Completion::Ready(result) => result,
            Completion::Pending(handle) => handle.join().unwrap_or_else(|_| {
                ExecutionResult::failed(
                    ExecError::Wait(io::Error::other("supervisor thread panicked")),
                    Instant::now(),
                )
            }),
        }
    }
}

impl Iterator for Execution {
    type Item = OutputChunk;

    fn next(&mut self) -> Option<OutputChunk> {
        while let Some(rx) = &self.chunks {
            if self.supervisor_finished() {
                // abandoned readers may hold pipes of an escaped process forever
                self.leftover.extend(rx.try_iter());
                self.chunks = None;
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => return Some(chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.chunks = None,
            }
        }
        self.leftover.pop_front()
    }
}

/// Runs commands that pass the policy.
pub struct Executor {
    policy: Arc<dyn CommandPolicy>,
}

impl Executor {
    pub fn new(policy: Arc<dyn CommandPolicy>) -> Self {
        Self { policy }
    }

    /// Validate and start `command`. Never blocks on the child.
    pub fn spawn(&self, command: &str, options: &ExecOptions) -> Execution {
        let start = Instant::now();

        let verdict = self.policy.evaluate(command);
        if !verdict.valid {
            let reason = verdict.reason.unwrap_or_default();
            warn!("blocked command: {reason}");
            return Execution::settled(ExecutionResult::failed(ExecError::Blocked(reason), start));
        }

        let mut cmd = Command::new(&options.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&options.env);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!("failed to spawn {}: {source}", options.shell);
                let error = ExecError::Spawn {
                    shell: options.shell.clone(),
                    source,
                };
                return Execution::settled(ExecutionResult::failed(error, start));
            }
        };
        debug!("spawned pid {} via {}", child.id(), options.shell);

        let (tx, rx) = mpsc::channel();
        let stdout = child
            .stdout
            .take()
            .map(|pipe| Capture::start(pipe, tx.clone(), OutputChunk::Stdout));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| Capture::start(pipe, tx, OutputChunk::Stderr));

        let deadline = start + options.timeout;
        let timeout = options.timeout;
        let handle =
            thread::spawn(move || supervise(child, stdout, stderr, start, deadline, timeout));

        Execution {
            chunks: Some(rx),
            leftover: VecDeque::new(),
            completion: Completion::Pending(handle),
        }
    }

    /// Validate, run to completion, and return the aggregate result.
    pub fn execute(&self, command: &str, options: &ExecOptions) -> ExecutionResult {
        self.spawn(command, options).wait()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::policy::DenyListPolicy;

    fn executor() -> Executor {
        Executor::new(Arc::new(DenyListPolicy::default()))
    }

    fn run(cmd: &str) -> ExecutionResult {
        executor().execute(cmd, &ExecOptions::default())
    }

    #[test]
    fn echo_succeeds() {
        let result = run("echo hello");
        assert!(result.success);
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.error.is_none());
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let result = run("exit 42");
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn stderr_captured() {
        let result = run("echo oops >&2");
        assert!(result.success);
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "oops");
    }

    #[test]
    fn trailing_whitespace_trimmed() {
        let result = run("printf '  a\\n\\n  '");
        assert_eq!(result.stdout, "  a");
    }

    #[test]
    fn blocked_command_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let cmd = format!("touch {} && rm -rf /", marker.display());
        let result = run(&cmd);
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(-1));
        assert!(matches!(result.error, Some(ExecError::Blocked(_))));
        assert_eq!(
            result.error.unwrap().to_string(),
            "Command blocked: Destructive: rm root"
        );
        assert!(!marker.exists());
    }

    #[test]
    fn timeout_kills_command() {
        let opts = ExecOptions {
            timeout: Duration::from_millis(200),
            ..ExecOptions::default()
        };
        let start = Instant::now();
        let result = executor().execute("sleep 10", &opts);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(-1));
        let err = result.error.unwrap();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert_eq!(err.to_string(), "Command timed out after 200ms");
    }

    #[test]
    fn background_job_holding_pipes_is_reaped_at_deadline() {
        let opts = ExecOptions {
            timeout: Duration::from_millis(300),
            ..ExecOptions::default()
        };
        let start = Instant::now();
        let result = executor().execute("sleep 10 & echo done", &opts);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "done");
    }

    /// True once `pid` no longer exists or is a zombie nobody reaped yet.
    #[cfg(target_os = "linux")]
    fn is_dead(pid: i32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return true;
        };
        let state = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next());
        state == Some('Z')
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_background_descendants() {
        let opts = ExecOptions {
            timeout: Duration::from_millis(300),
            ..ExecOptions::default()
        };
        let result = executor().execute("sleep 30 & echo $!; sleep 30", &opts);
        assert!(matches!(result.error, Some(ExecError::Timeout { .. })));
        let pid: i32 = result.stdout.trim().parse().unwrap();

        let give_up = Instant::now() + Duration::from_secs(2);
        while !is_dead(pid) && Instant::now() < give_up {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(is_dead(pid), "background sleep {pid} survived the timeout");
    }

    fn has_setsid() -> bool {
        ["/usr/bin/setsid", "/bin/setsid"]
            .iter()
            .any(|p| std::path::Path::new(p).exists())
    }

    #[test]
    fn escaped_descendant_does_not_stall_iteration() {
        if !has_setsid() {
            return;
        }
        let opts = ExecOptions {
            timeout: Duration::from_millis(300),
            ..ExecOptions::default()
        };
        let start = Instant::now();
        let mut execution = executor().spawn("setsid sleep 5 & echo started", &opts);
        let stdout: String = execution
            .by_ref()
            .filter(|c| matches!(c, OutputChunk::Stdout(_)))
            .map(|c| c.text().to_string())
            .collect();
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
        assert_eq!(stdout, "started\n");

        let result = execution.wait();
        assert_eq!(result.exit_code, Some(0));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn env_overrides_applied() {
        let mut opts = ExecOptions::default();
        opts.env.insert("CLAUDELINK_GREETING".into(), "hi there".into());
        let result = executor().execute("echo \"$CLAUDELINK_GREETING\"", &opts);
        assert_eq!(result.stdout, "hi there");
    }

    #[test]
    fn working_dir_applied() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions {
            working_dir: Some(dir.path().to_path_buf()),
            ..ExecOptions::default()
        };
        let result = executor().execute("pwd -P", &opts);
        assert_eq!(
            std::path::Path::new(&result.stdout),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn spawn_failure_reported() {
        let opts = ExecOptions {
            shell: "/nonexistent/claudelink-shell".into(),
            ..ExecOptions::default()
        };
        let result = executor().execute("echo hi", &opts);
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(-1));
        assert!(matches!(result.error, Some(ExecError::Spawn { .. })));
    }

    #[test]
    fn death_by_signal_has_no_exit_code() {
        let result = run("kill -9 $$");
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(matches!(result.error, Some(ExecError::Signal(9))));
    }

    #[test]
    fn chunks_stream_before_wait() {
        let mut execution = executor().spawn(
            "echo one; echo two >&2; echo three",
            &ExecOptions::default(),
        );
        let chunks: Vec<OutputChunk> = execution.by_ref().collect();
        let stdout: String = chunks
            .iter()
            .filter(|c| matches!(c, OutputChunk::Stdout(_)))
            .map(OutputChunk::text)
            .collect();
        let stderr: String = chunks
            .iter()
            .filter(|c| matches!(c, OutputChunk::Stderr(_)))
            .map(OutputChunk::text)
            .collect();
        assert_eq!(stdout, "one\nthree\n");
        assert_eq!(stderr, "two\n");

        let result = execution.wait();
        assert_eq!(result.stdout, "one\nthree");
        assert_eq!(result.stderr, "two");
    }

    #[test]
    fn blocked_execution_yields_no_chunks() {
        let mut execution = executor().spawn(":(){ :|:& };:", &ExecOptions::default());
        assert!(execution.next().is_none());
        let result = execution.wait();
        assert_eq!(
            result.error.map(|e| e.to_string()),
            Some("Command blocked: Fork bomb detected".to_string())
        );
    }
}
