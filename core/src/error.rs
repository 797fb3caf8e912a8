//! Error types for the devwatch-core library.

use thiserror::Error;

use crate::kubernetes::errors::KubectlError;

/// Result type alias for devwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a watch cycle.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid local configuration, detected before anything is spawned.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No pod selector could be derived from the deployed resources.
    #[error("Unable to determine a selector for application pods")]
    NoSelector,

    /// The watch cycle was cancelled before the companion was started.
    #[error("Watch cancelled")]
    Cancelled,

    /// Neither an exposed service nor a port forward produced an endpoint.
    #[error("Unable to open a channel to the remote pod: no endpoint found")]
    NoEndpoint,

    /// The companion process could not be started.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),


    /// Kubernetes/kubectl error.
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubectlError),
}

impl Error {
    /// Whether the error means the cycle had nowhere to connect to.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Error::NoSelector | Error::NoEndpoint)
    }
}
