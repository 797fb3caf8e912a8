//! In-memory cluster used by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::client::ClusterClient;
use super::errors::{KubectlError, Result};
use super::models::LabelSelector;

#[derive(Default)]
struct ScriptedService {
    annotations: BTreeMap<String, String>,
    /// Annotations become visible on this (1-based) fetch.
    visible_from_fetch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCall {
    pub pod: String,
    pub local_port: u16,
    pub remote_port: u16,
}

#[derive(Default)]
pub struct FakeCluster {
    services: Mutex<HashMap<String, ScriptedService>>,
    fetches: Mutex<HashMap<String, u32>>,
    failing_services: Mutex<Vec<String>>,
    pods: Mutex<Vec<String>>,
    select_calls: AtomicU32,
    forwards: Mutex<Vec<ForwardCall>>,
    stopped_forwards: AtomicU32,
    short_forwards: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service with no annotations.
    pub fn with_service(self, name: &str) -> Self {
        self.services
            .lock()
            .insert(name.to_string(), ScriptedService::default());
        self
    }

    /// Registers a service whose annotation appears on the `fetch`-th read.
    pub fn with_annotation_on_fetch(self, name: &str, key: &str, value: &str, fetch: u32) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.to_string(), value.to_string());
        self.services.lock().insert(
            name.to_string(),
            ScriptedService {
                annotations,
                visible_from_fetch: fetch,
            },
        );
        self
    }

    /// Makes every annotation read of `name` fail.
    pub fn with_failing_service(self, name: &str) -> Self {
        self.failing_services.lock().push(name.to_string());
        self
    }

    pub fn with_pods(self, pods: &[&str]) -> Self {
        *self.pods.lock() = pods.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Makes every forward end right after it starts, like a pod going away.
    pub fn with_short_forwards(self) -> Self {
        self.short_forwards.store(true, Ordering::SeqCst);
        self
    }

    /// Replaces the pods returned by later selections.
    pub fn set_pods(&self, pods: &[&str]) {
        *self.pods.lock() = pods.iter().map(|p| p.to_string()).collect();
    }

    pub fn fetches(&self, name: &str) -> u32 {
        self.fetches.lock().get(name).copied().unwrap_or(0)
    }

    pub fn select_calls(&self) -> u32 {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub fn forwards(&self) -> Vec<ForwardCall> {
        self.forwards.lock().clone()
    }

    pub fn stopped_forwards(&self) -> u32 {
        self.stopped_forwards.load(Ordering::SeqCst)
    }
}

impl ClusterClient for FakeCluster {
    async fn service_annotations(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let fetch = {
            let mut fetches = self.fetches.lock();
            let count = fetches.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if self.failing_services.lock().iter().any(|s| s == name) {
            return Err(KubectlError::Timeout);
        }

        let services = self.services.lock();
        Ok(services.get(name).map(|service| {
            if fetch >= service.visible_from_fetch {
                service.annotations.clone()
            } else {
                BTreeMap::new()
            }
        }))
    }

    async fn select_pods(&self, _selector: &LabelSelector) -> Result<Vec<String>> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.lock().clone())
    }

    async fn forward_port(
        &self,
        pod: &str,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.forwards.lock().push(ForwardCall {
            pod: pod.to_string(),
            local_port,
            remote_port,
        });
        if !self.short_forwards.load(Ordering::SeqCst) {
            cancel.cancelled().await;
        }
        self.stopped_forwards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
