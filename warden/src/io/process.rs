//! Child process supervision with timeouts, cancellation, and bounded output.
//!
//! A supervised process moves through named states:
//!
//! ```text
//! Starting -> Running -> Exited
//!                     -> Terminating -> Exited | Killed
//! ```
//!
//! On timeout or cancellation the process group receives SIGTERM, gets a grace
//! period, and is force-killed if still alive.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Terminating,
    Killed,
    Exited,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Terminating => "terminating",
            ProcessState::Killed => "killed",
            ProcessState::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// Shared flag that asks every supervised process watching it to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub timeout: Duration,
    /// Delay between SIGTERM and a forced kill.
    pub grace: Duration,
    pub output_limit_bytes: usize,
    pub cancel: Option<CancelFlag>,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Every state the process passed through, ending in `Exited` or `Killed`.
    pub states: Vec<ProcessState>,
}

impl CommandOutput {
    pub fn final_state(&self) -> ProcessState {
        self.states.last().copied().unwrap_or(ProcessState::Starting)
    }

    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        truncated_notice(label, "stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        truncated_notice(label, "stderr", self.stderr_truncated)
    }
}

fn truncated_notice(label: &str, stream: &str, bytes: usize) -> String {
    if bytes > 0 {
        format!("\n[{label} {stream} truncated {bytes} bytes]\n")
    } else {
        String::new()
    }
}

struct Supervised {
    child: Child,
    states: Vec<ProcessState>,
}

impl Supervised {
    fn enter(&mut self, state: ProcessState) {
        debug!(pid = self.child.id(), %state, "process state");
        self.states.push(state);
    }

    /// Wait in short slices until exit, deadline, or cancellation.
    fn wait_until(&mut self, deadline: Instant, cancel: Option<&CancelFlag>) -> Result<Option<ExitStatus>> {
        loop {
            let now = Instant::now();
            if now >= deadline || cancel.is_some_and(CancelFlag::is_cancelled) {
                return Ok(None);
            }
            let slice = WAIT_SLICE.min(deadline - now);
            if let Some(status) = self.child.wait_timeout(slice).context("wait for command")? {
                return Ok(Some(status));
            }
        }
    }

    fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        self.enter(ProcessState::Terminating);
        signal_group(self.child.id(), "TERM");
        if let Some(status) = self
            .child
            .wait_timeout(grace)
            .context("wait for command after SIGTERM")?
        {
            self.enter(ProcessState::Exited);
            return Ok(status);
        }
        warn!(
            pid = self.child.id(),
            grace_secs = grace.as_secs(),
            "process ignored SIGTERM, killing"
        );
        signal_group(self.child.id(), "KILL");
        if let Err(err) = self.child.kill()
            && err.kind() != ErrorKind::InvalidInput
        {
            return Err(err).context("kill command");
        }
        let status = self.child.wait().context("wait command after kill")?;
        self.enter(ProcessState::Killed);
        Ok(status)
    }
}

/// Signal the child's whole process group so shells do not leave orphans
/// holding the output pipes open.
#[cfg(unix)]
fn signal_group(pid: u32, signal: &str) {
    let result = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = result {
        warn!(pid, signal, err = %err, "failed to deliver signal");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: &str) {}

/// Run a command under supervision, capturing stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs; `output_limit_bytes` bounds
/// what is kept in memory while the pipes are still drained.
#[instrument(skip_all, fields(timeout_secs = opts.timeout.as_secs(), output_limit_bytes = opts.output_limit_bytes))]
pub fn supervise(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    opts: &SupervisorOptions,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut states = vec![ProcessState::Starting];
    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    states.push(ProcessState::Running);
    let mut proc = Supervised { child, states };
    debug!(pid = proc.child.id(), "process running");

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = proc
                .child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || match child_stdin.write_all(&input) {
                Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }))
        }
        None => None,
    };

    let stdout = proc
        .child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = proc
        .child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = opts.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let deadline = Instant::now() + opts.timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = match proc.wait_until(deadline, opts.cancel.as_ref())? {
        Some(status) => {
            proc.enter(ProcessState::Exited);
            status
        }
        None => {
            cancelled = opts.cancel.as_ref().is_some_and(CancelFlag::is_cancelled);
            timed_out = !cancelled;
            warn!(
                timeout_secs = opts.timeout.as_secs(),
                cancelled, "stopping command"
            );
            proc.terminate(opts.grace)?
        }
    };

    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(err = %err, "failed to write stdin"),
            Err(_) => warn!("stdin writer thread panicked"),
        }
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
        states: proc.states,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn opts(timeout_ms: u64, grace_ms: u64) -> SupervisorOptions {
        SupervisorOptions {
            timeout: Duration::from_millis(timeout_ms),
            grace: Duration::from_millis(grace_ms),
            output_limit_bytes: 1024,
            cancel: None,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let out = supervise(sh("cat; echo done"), Some(b"hello\n"), &opts(5_000, 500))
            .expect("run");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\ndone\n");
        assert_eq!(
            out.states,
            vec![
                ProcessState::Starting,
                ProcessState::Running,
                ProcessState::Exited
            ]
        );
    }

    #[test]
    fn timeout_terminates_gracefully() {
        let started = Instant::now();
        let out = supervise(sh("sleep 30"), None, &opts(200, 2_000)).expect("run");
        assert!(out.timed_out);
        assert!(out.states.contains(&ProcessState::Terminating));
        assert_eq!(out.final_state(), ProcessState::Exited);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn ignored_sigterm_escalates_to_kill() {
        let out = supervise(sh("trap '' TERM; while :; do sleep 0.05; done"), None, &opts(200, 300))
            .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.final_state(), ProcessState::Killed);
    }

    #[test]
    fn cancellation_stops_without_timeout() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let options = SupervisorOptions {
            cancel: Some(cancel),
            ..opts(30_000, 1_000)
        };
        let out = supervise(sh("sleep 30"), None, &options).expect("run");
        assert!(out.cancelled);
        assert!(!out.timed_out);
    }

    #[test]
    fn output_is_bounded() {
        let out = supervise(sh("head -c 5000 /dev/zero"), None, &opts(5_000, 500)).expect("run");
        assert_eq!(out.stdout.len(), 1024);
        assert_eq!(out.stdout_truncated, 5000 - 1024);
        assert!(out.stdout_truncated_notice("worker").contains("truncated 3976 bytes"));
    }
}
