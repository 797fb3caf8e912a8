//! Cluster access seams used by the resolver and the watcher.
//!
//! Implementations live in [`super::kubectl`]; tests substitute in-memory
//! clients.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use super::errors::Result;
use super::models::{LabelSelector, ResourceSet};

/// Operations the watcher needs from the cluster.
pub trait ClusterClient: Send + Sync + 'static {
    /// Fetches the current annotations of a service.
    ///
    /// Returns `Ok(None)` when the service does not exist (yet).
    fn service_annotations(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<BTreeMap<String, String>>>> + Send;

    /// Lists the names of pods matching a label selector.
    fn select_pods(
        &self,
        selector: &LabelSelector,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;

    /// Forwards `local_port` to `remote_port` on `pod`.
    ///
    /// Resolves when the forward ends on its own or `cancel` fires.
    fn forward_port(
        &self,
        pod: &str,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Streams application pod logs for the duration of a watch cycle.
pub trait PodLogTailer: Send + Sync {
    /// Starts tailing logs of the application pods in `resources`.
    ///
    /// Must return once tailing has been set up; the tail itself keeps
    /// running until `cancel` fires.
    fn tail_app_pods(
        &self,
        resources: &ResourceSet,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
