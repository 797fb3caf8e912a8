//! kubectl-backed cluster client and pod log tailer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ClusterClient, PodLogTailer};
use super::errors::{KubectlError, Result};
use super::models::{LabelSelector, Manifest, PodListResponse, ResourceSet};

/// Default paths to search for kubectl.
const KUBECTL_PATHS: &[&str] = &[
    "/opt/homebrew/bin/kubectl", // Apple Silicon
    "/usr/local/bin/kubectl",    // Intel Mac / Homebrew
    "/usr/bin/kubectl",          // System
];

/// Timeout for one-shot kubectl queries.
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

/// Cluster client that shells out to kubectl.
#[derive(Debug, Clone)]
pub struct Kubectl {
    kubectl_path: Option<PathBuf>,
    namespace: Option<String>,
}

impl Kubectl {
    /// Creates a client, searching the usual install locations and `PATH`.
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            kubectl_path: find_kubectl(),
            namespace,
        }
    }

    /// Creates a client with an explicit kubectl path.
    pub fn with_path(kubectl_path: Option<PathBuf>, namespace: Option<String>) -> Self {
        Self {
            kubectl_path,
            namespace,
        }
    }

    /// Returns the kubectl path if found.
    pub fn kubectl_path(&self) -> Option<&PathBuf> {
        self.kubectl_path.as_ref()
    }

    /// Returns true if kubectl is available.
    pub fn is_kubectl_available(&self) -> bool {
        self.kubectl_path.is_some()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn command(&self) -> Result<Command> {
        let kubectl_path = self
            .kubectl_path
            .as_ref()
            .ok_or(KubectlError::KubectlNotFound)?;

        let mut command = Command::new(kubectl_path);
        if let Some(namespace) = &self.namespace {
            command.args(["-n", namespace]);
        }
        Ok(command)
    }

    /// Executes a kubectl command and returns its stdout.
    async fn execute_kubectl(&self, args: &[&str]) -> Result<String> {
        let mut command = self.command()?;
        command.args(args);

        let result = timeout(KUBECTL_TIMEOUT, async {
            let output = command.output().await?;

            Ok::<_, std::io::Error>((output.status, output.stdout, output.stderr))
        })
        .await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                if status.success() {
                    String::from_utf8(stdout)
                        .map_err(|e| KubectlError::ParsingFailed(e.to_string()))
                } else {
                    let stderr_str = String::from_utf8_lossy(&stderr);
                    Err(KubectlError::from_kubectl_error(&stderr_str))
                }
            }
            Ok(Err(e)) => Err(KubectlError::Io(e)),
            Err(_) => Err(KubectlError::Timeout),
        }
    }

    /// Spawns a long-running kubectl process with piped output.
    fn spawn_kubectl(&self, args: &[String]) -> Result<Child> {
        let mut command = self.command()?;
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command
            .spawn()
            .map_err(|e| KubectlError::ProcessError(format!("Failed to start kubectl: {}", e)))
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ClusterClient for Kubectl {
    async fn service_annotations(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let output = match self
            .execute_kubectl(&["get", "service", name, "-o", "json", "--request-timeout=10s"])
            .await
        {
            Ok(output) => output,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let manifest: Manifest = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        Ok(Some(manifest.metadata.annotations.unwrap_or_default()))
    }

    async fn select_pods(&self, selector: &LabelSelector) -> Result<Vec<String>> {
        let selector_arg = selector.to_kubectl_arg();
        let output = self
            .execute_kubectl(&[
                "get",
                "pods",
                "-l",
                &selector_arg,
                "-o",
                "json",
                "--request-timeout=10s",
            ])
            .await?;

        let response: PodListResponse = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        Ok(response.into_pod_names())
    }

    async fn forward_port(
        &self,
        pod: &str,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> Result<()> {
        let args = vec![
            "port-forward".to_string(),
            format!("pod/{}", pod),
            format!("{}:{}", local_port, remote_port),
            "--address=127.0.0.1".to_string(),
        ];
        let mut child = self.spawn_kubectl(&args)?;
        info!(pod, local_port, remote_port, "kubectl port-forward started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_kubectl_output(stdout, "port-forward"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_kubectl_output(stderr, "port-forward"));
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    debug!(pod, local_port, "port-forward exited");
                    Ok(())
                } else {
                    Err(KubectlError::CommandFailed(format!(
                        "port-forward to pod/{} exited with {}",
                        pod, status
                    )))
                }
            }
            _ = cancel.cancelled() => {
                debug!(pod, local_port, "stopping port-forward");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(())
            }
        }
    }
}

/// Pod log tailer running `kubectl logs -f` on the application pods.
#[derive(Debug, Clone, Default)]
pub struct KubectlLogTailer {
    kubectl: Kubectl,
}

impl KubectlLogTailer {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

impl PodLogTailer for KubectlLogTailer {
    async fn tail_app_pods(&self, resources: &ResourceSet, cancel: CancellationToken) -> Result<()> {
        let Some(selector) = resources.pod_selector() else {
            warn!("Unable to determine a selector for application pods, not tailing logs");
            return Ok(());
        };

        let args = vec![
            "logs".to_string(),
            "-f".to_string(),
            "--prefix".to_string(),
            "--all-containers".to_string(),
            "--max-log-requests=10".to_string(),
            "-l".to_string(),
            selector.to_kubectl_arg(),
        ];
        let mut child = self.kubectl.spawn_kubectl(&args)?;
        info!(%selector, "tailing application pod logs");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::spawn(async move {
            if let Some(stdout) = stdout {
                tokio::spawn(log_pod_output(stdout));
            }
            if let Some(stderr) = stderr {
                tokio::spawn(log_kubectl_output(stderr, "logs"));
            }
            tokio::select! {
                _ = child.wait() => debug!("pod log tail ended"),
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        });

        Ok(())
    }
}

async fn log_pod_output<R: AsyncRead + Unpin>(reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "devwatch::pod", "{}", line);
    }
}

async fn log_kubectl_output<R: AsyncRead + Unpin>(reader: R, command: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_error_line(&line) {
            warn!(command, "{}", line);
        } else {
            debug!(command, "{}", line);
        }
    }
}

/// Checks if a line of kubectl output indicates an error.
pub fn is_error_line(line: &str) -> bool {
    let line_lower = line.to_lowercase();
    line_lower.contains("error")
        || line_lower.contains("failed")
        || line_lower.contains("unable to")
        || line_lower.contains("connection refused")
        || line_lower.contains("lost connection")
        || line_lower.contains("an error occurred")
}

/// Finds kubectl on the known install paths, then on `PATH`.
fn find_kubectl() -> Option<PathBuf> {
    find_executable(KUBECTL_PATHS).or_else(|| {
        std::env::var_os("PATH").and_then(|path| {
            std::env::split_paths(&path)
                .map(|dir| dir.join("kubectl"))
                .find(|candidate| candidate.is_file())
        })
    })
}

/// Finds an executable in the given paths.
fn find_executable(paths: &[&str]) -> Option<PathBuf> {
    paths.iter().map(PathBuf::from).find(|path| path.exists())
}
