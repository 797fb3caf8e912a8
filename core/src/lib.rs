//! devwatch core library
//!
//! Connects a local remote-dev-tools client to an application that was just
//! deployed to Kubernetes. Provides functionality to:
//! - Discover the URL an exposure controller publishes on a service
//! - Fall back to a local port forward into an application pod
//! - Launch the companion client and supervise it until exit or cancellation
//! - Persist user configuration (wait budget, exposure label, kubectl path)
//!
//! # Architecture
//! - `kubernetes`: cluster access seams and the kubectl-backed adapter
//! - `retry`, `tunnel`, `resolver`: endpoint discovery
//! - `supervisor`: companion process lifecycle
//! - `watcher`: one watch cycle wiring the above together

pub mod config;
pub mod error;
pub mod kubernetes;
pub mod project;
pub mod resolver;
pub mod retry;
pub mod supervisor;
pub mod tunnel;
pub mod watcher;

pub use config::{ConfigStore, EndpointResolutionConfig, WatchConfig};
pub use error::{Error, Result};
pub use kubernetes::{ClusterClient, Kubectl, KubectlLogTailer, PodLogTailer, ResourceSet};
pub use project::{ApplicationProperties, CompanionLaunch, ProjectMetadata};
pub use resolver::{EndpointResolver, EndpointSource, ResolvedEndpoint};
pub use supervisor::{
    CollectingSink, OutputSink, OutputStream, ProcessSpec, ProcessSupervisor, SupervisionOutcome,
    TracingSink,
};
pub use tunnel::{PortForwarder, TunnelHandle, TunnelRequest};
pub use watcher::{DevToolsWatcher, WatchOutcome};
