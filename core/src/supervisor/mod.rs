//! Supervision of the companion process.
//!
//! The supervisor spawns the process, forwards its output line by line to an
//! [`OutputSink`] and waits for it to exit. Cancellation is cooperative: the
//! caller fires a [`CancellationToken`], output forwarding stops first and the
//! process is then asked to terminate.

mod command;
mod handle;
mod sink;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub use command::ProcessSpec;
pub use handle::{exit_code, ProcessHandle, ProcessState};
pub use sink::{CollectingSink, OutputSink, OutputStream, TracingSink};

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionOutcome {
    /// Exit code; `128 + signal` when killed by a signal on unix.
    pub exit_code: Option<i32>,
    pub state: ProcessState,
}

impl SupervisionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn was_cancelled(&self) -> bool {
        self.state == ProcessState::Terminated
    }

    /// Describes a non-zero exit, `None` on success.
    pub fn warning(&self) -> Option<String> {
        match self.exit_code {
            Some(0) => None,
            Some(code) => Some(format!("Process returned status code {}", code)),
            None => Some("Process ended without a status code".to_string()),
        }
    }
}

/// Runs companion processes to completion.
#[derive(Clone)]
pub struct ProcessSupervisor {
    sink: Arc<dyn OutputSink>,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }

    /// Runs `spec` until it exits or `cancel` fires.
    ///
    /// A non-zero exit is logged, not returned as an error. Nothing is
    /// spawned when `cancel` has already fired.
    pub async fn supervise(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
    ) -> Result<SupervisionOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(command = ?spec, "Running companion process");
        let mut handle = ProcessHandle::spawn(spec, Arc::clone(&self.sink))?;

        let status = tokio::select! {
            status = handle.wait() => status,
            _ = cancel.cancelled() => {
                info!(pid = handle.pid(), "Stopping companion process");
                handle.disable_output();
                if let Err(e) = handle.terminate() {
                    warn!(pid = handle.pid(), error = %e, "Failed to signal companion process");
                }
                handle.wait().await
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                handle.disable_output();
                let _ = handle.terminate();
                handle.join_drains().await;
                return Err(e);
            }
        };
        handle.join_drains().await;

        let outcome = SupervisionOutcome {
            exit_code: exit_code(&status),
            state: handle.state(),
        };
        match outcome.warning() {
            Some(warning) => warn!(pid = handle.pid(), state = ?outcome.state, "{}", warning),
            None => info!(pid = handle.pid(), "Companion process exited"),
        }
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", ["-c", script])
    }

    fn supervisor() -> (ProcessSupervisor, CollectingSink) {
        let sink = CollectingSink::new();
        (ProcessSupervisor::new(Arc::new(sink.clone())), sink)
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_success_with_warning() {
        let (supervisor, _) = supervisor();
        let outcome = supervisor
            .supervise(&sh("exit 137"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(137));
        assert_eq!(outcome.state, ProcessState::Exited);
        assert!(!outcome.success());
        assert!(outcome.warning().unwrap().contains("137"));
    }

    #[tokio::test]
    async fn test_clean_exit_forwards_all_output() {
        let (supervisor, sink) = supervisor();
        let outcome = supervisor
            .supervise(
                &sh("echo one; echo two; echo failure >&2"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success());
        assert!(outcome.warning().is_none());
        assert_eq!(sink.stream(OutputStream::Stdout), vec!["one", "two"]);
        assert_eq!(sink.stream(OutputStream::Stderr), vec!["failure"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_output_before_termination() {
        let (supervisor, sink) = supervisor();
        let cancel = CancellationToken::new();

        let trigger = {
            let cancel = cancel.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                for _ in 0..400 {
                    if sink.contains("before") {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let script = "trap 'echo after; exit 0' TERM; echo before; \
                      while true; do sleep 0.05; done";
        let outcome = supervisor.supervise(&sh(script), &cancel).await.unwrap();
        trigger.await.unwrap();

        assert_eq!(outcome.state, ProcessState::Terminated);
        assert!(outcome.was_cancelled());
        assert!(sink.contains("before"));
        assert!(!sink.contains("after"));
    }

    #[tokio::test]
    async fn test_cancel_after_exit_reports_exit() {
        let (supervisor, _) = supervisor();
        let cancel = CancellationToken::new();

        let outcome = supervisor.supervise(&sh("exit 3"), &cancel).await.unwrap();
        cancel.cancel();

        assert_eq!(outcome.state, ProcessState::Exited);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_already_cancelled_spawns_nothing() {
        let (supervisor, sink) = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = supervisor
            .supervise(&sh(&format!("touch {}; echo started", marker.display())), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists());
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let (supervisor, _) = supervisor();
        let spec = ProcessSpec::new("/nonexistent/java", ["-version"]);

        let err = supervisor
            .supervise(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
