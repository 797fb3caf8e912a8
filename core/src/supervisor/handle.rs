//! A spawned companion process and its output drains.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::command::ProcessSpec;
use super::sink::{OutputSink, OutputStream};
use crate::error::{Error, Result};

/// How long to wait for the drains after the process is gone. Descendants
/// that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Spawned,
    Running,
    /// Termination was requested.
    Cancelling,
    /// Ended on its own.
    Exited,
    /// Ended after termination was requested.
    Terminated,
}

impl ProcessState {
    pub fn is_finished(&self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Terminated)
    }
}

pub struct ProcessHandle {
    child: Child,
    program: String,
    pid: Option<u32>,
    state: ProcessState,
    output_enabled: Arc<AtomicBool>,
    drains: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawns `spec` and starts draining both output pipes into `sink`.
    pub fn spawn(spec: &ProcessSpec, sink: Arc<dyn OutputSink>) -> Result<Self> {
        let program = spec.program().display().to_string();
        let child = spec.command().spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(program = %program, pid, "process spawned");

        let mut handle = Self {
            child,
            program,
            pid,
            state: ProcessState::Spawned,
            output_enabled: Arc::new(AtomicBool::new(true)),
            drains: Vec::with_capacity(2),
        };
        handle.start_drains(sink);
        Ok(handle)
    }

    fn start_drains(&mut self, sink: Arc<dyn OutputSink>) {
        if let Some(stdout) = self.child.stdout.take() {
            self.drains.push(tokio::spawn(drain(
                stdout,
                OutputStream::Stdout,
                Arc::clone(&self.output_enabled),
                Arc::clone(&sink),
            )));
        }
        if let Some(stderr) = self.child.stderr.take() {
            self.drains.push(tokio::spawn(drain(
                stderr,
                OutputStream::Stderr,
                Arc::clone(&self.output_enabled),
                sink,
            )));
        }
        self.state = ProcessState::Running;
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled.load(Ordering::SeqCst)
    }

    /// Stops forwarding output; lines read from now on are discarded.
    pub fn disable_output(&self) {
        self.output_enabled.store(false, Ordering::SeqCst);
    }

    /// Asks the process to stop.
    ///
    /// A no-op once the process has exited or was already asked to stop.
    pub fn terminate(&mut self) -> Result<()> {
        if self.state == ProcessState::Cancelling || self.state.is_finished() {
            return Ok(());
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        self.state = ProcessState::Cancelling;
        debug!(program = %self.program, pid = self.pid, "terminating process");
        self.send_terminate()
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Io(std::io::Error::from(e))),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Waits for the process to exit and records how it ended.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.state = match self.state {
            ProcessState::Cancelling | ProcessState::Terminated => ProcessState::Terminated,
            _ => ProcessState::Exited,
        };
        debug!(program = %self.program, pid = self.pid, state = ?self.state, %status, "process ended");
        Ok(status)
    }

    /// Waits for both drain tasks to reach end of stream.
    pub async fn join_drains(&mut self) {
        for mut task in self.drains.drain(..) {
            if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
                debug!(program = %self.program, "output pipe still open, abandoning drain");
                task.abort();
            }
        }
    }
}

async fn drain<R>(
    reader: R,
    stream: OutputStream,
    output_enabled: Arc<AtomicBool>,
    sink: Arc<dyn OutputSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if output_enabled.load(Ordering::SeqCst) {
                    sink.line(stream, &decode_line(&buf));
                }
            }
            Err(e) => {
                if output_enabled.load(Ordering::SeqCst) {
                    warn!(stream = stream.as_str(), error = %e, "Failed to read process output");
                }
                break;
            }
        }
    }
}

/// Lossy UTF-8 decoding without the line terminator.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Exit code, with death by signal reported shell-style as `128 + signal`.
pub fn exit_code(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|signal| 128 + signal))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}
