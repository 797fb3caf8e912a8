//! Errors produced by the kubectl adapters.

use thiserror::Error;

/// Result type alias for kubectl operations.
pub type Result<T> = std::result::Result<T, KubectlError>;

/// Errors that can occur while talking to the cluster through kubectl.
#[derive(Error, Debug)]
pub enum KubectlError {
    /// kubectl binary not found on any known path.
    #[error("kubectl not found")]
    KubectlNotFound,

    /// The kubectl command did not finish in time.
    #[error("kubectl command timed out")]
    Timeout,

    /// kubectl output could not be parsed.
    #[error("Failed to parse kubectl output: {0}")]
    ParsingFailed(String),

    /// The cluster is unreachable or no kubeconfig is set up.
    #[error("Cluster not connected: {0}")]
    ClusterNotConnected(String),

    /// kubectl exited with an error.
    #[error("kubectl failed: {0}")]
    CommandFailed(String),

    /// A long-running kubectl process could not be managed.
    #[error("Process error: {0}")]
    ProcessError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubectlError {
    /// Classifies kubectl stderr output.
    pub fn from_kubectl_error(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("connection refused")
            || lower.contains("no configuration has been provided")
            || lower.contains("dial tcp")
            || lower.contains("unable to connect to the server")
        {
            KubectlError::ClusterNotConnected(stderr.trim().to_string())
        } else {
            KubectlError::CommandFailed(stderr.trim().to_string())
        }
    }

    /// Returns true if the error means the cluster cannot be reached.
    pub fn is_cluster_not_connected(&self) -> bool {
        matches!(self, KubectlError::ClusterNotConnected(_))
    }

    /// Returns true if kubectl reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            KubectlError::CommandFailed(msg) => {
                msg.contains("NotFound") || msg.to_lowercase().contains("not found")
            }
            _ => false,
        }
    }
}
