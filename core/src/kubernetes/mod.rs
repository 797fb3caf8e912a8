//! Kubernetes access for the watcher.
//!
//! This module provides:
//! - The [`ClusterClient`] and [`PodLogTailer`] seams the watcher talks to
//! - A kubectl-backed implementation of both
//! - Typed views over deployed manifests and kubectl JSON output

pub mod client;
pub mod errors;
pub mod kubectl;
pub mod models;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ClusterClient, PodLogTailer};
pub use errors::{KubectlError, Result};
pub use kubectl::{Kubectl, KubectlLogTailer};
pub use models::{LabelSelector, ResourceDescriptor, ResourceSet, ServiceRecord};
