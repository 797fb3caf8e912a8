//! Kubernetes data models for deployed resources, services and pod selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{KubectlError, Result};

/// Workload kinds whose spec carries a pod selector.
const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "DeploymentConfig",
    "ReplicaSet",
    "ReplicationController",
    "StatefulSet",
    "DaemonSet",
    "Job",
];

// ============================================================================
// Label Selector
// ============================================================================

/// Equality-based label selector (`matchLabels`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new(match_labels: BTreeMap<String, String>) -> Self {
        Self { match_labels }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    /// Renders the selector in kubectl's `-l` syntax (`app=foo,tier=web`).
    pub fn to_kubectl_arg(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSelector {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_kubectl_arg())
    }
}

// ============================================================================
// Deployed Resources
// ============================================================================

/// A single cluster resource produced by the deployment step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Pod selector for services and workload kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

impl ResourceDescriptor {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn is_service(&self) -> bool {
        self.kind.eq_ignore_ascii_case("Service")
    }

    pub fn is_workload(&self) -> bool {
        WORKLOAD_KINDS
            .iter()
            .any(|kind| self.kind.eq_ignore_ascii_case(kind))
    }
}

/// Snapshot of the resources deployed for one watch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    resources: Vec<ResourceDescriptor>,
}

impl ResourceSet {
    pub fn new(resources: Vec<ResourceDescriptor>) -> Self {
        Self { resources }
    }

    /// Parses `kubectl get -o json` list output, a JSON array of manifests,
    /// or a single manifest.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        let manifests = match value {
            Value::Array(items) => items,
            Value::Object(ref obj) if obj.contains_key("items") => match obj.get("items") {
                Some(Value::Array(items)) => items.clone(),
                _ => {
                    return Err(KubectlError::ParsingFailed(
                        "`items` is not an array".to_string(),
                    ))
                }
            },
            other => vec![other],
        };

        let resources = manifests
            .into_iter()
            .map(|m| {
                serde_json::from_value::<Manifest>(m)
                    .map(Manifest::into_descriptor)
                    .map_err(|e| KubectlError::ParsingFailed(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { resources })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Services in snapshot order.
    pub fn services(&self) -> impl Iterator<Item = ServiceRecord<'_>> {
        self.resources
            .iter()
            .filter(|r| r.is_service())
            .map(ServiceRecord::new)
    }

    /// Selector for the application's pods.
    ///
    /// The first workload with a non-empty selector wins; otherwise the first
    /// service selector is used.
    pub fn pod_selector(&self) -> Option<LabelSelector> {
        let non_empty = |r: &&ResourceDescriptor| r.selector.as_ref().is_some_and(|s| !s.is_empty());

        self.resources
            .iter()
            .filter(|r| r.is_workload())
            .find(non_empty)
            .or_else(|| self.resources.iter().filter(|r| r.is_service()).find(non_empty))
            .and_then(|r| r.selector.clone())
    }
}

impl FromIterator<ResourceDescriptor> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = ResourceDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A service in the deployed snapshot.
///
/// Labels come from the snapshot; annotations must be re-read from the
/// cluster because exposure controllers add them after creation.
#[derive(Debug, Clone, Copy)]
pub struct ServiceRecord<'a> {
    descriptor: &'a ResourceDescriptor,
}

impl<'a> ServiceRecord<'a> {
    pub fn new(descriptor: &'a ResourceDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn name(&self) -> &'a str {
        &self.descriptor.name
    }

    pub fn labels(&self) -> &'a BTreeMap<String, String> {
        &self.descriptor.labels
    }

    /// Whether `labels[key]` equals `value`, ignoring case.
    pub fn is_marked_for_exposure(&self, key: &str, value: &str) -> bool {
        self.descriptor
            .labels
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case(value))
    }
}

// ============================================================================
// kubectl JSON Response Parsing
// ============================================================================

/// A generic manifest as returned by kubectl.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub kind: String,
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub spec: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ObjectMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    pub fn into_descriptor(self) -> ResourceDescriptor {
        let selector = self.spec.as_ref().and_then(|spec| extract_selector(&self.kind, spec));
        ResourceDescriptor {
            kind: self.kind,
            name: self.metadata.name,
            labels: self.metadata.labels.unwrap_or_default(),
            annotations: self.metadata.annotations.unwrap_or_default(),
            selector,
        }
    }
}

/// Reads the pod selector from a manifest spec.
///
/// Services and replication controllers use a flat map; apps/v1 workloads
/// use `selector.matchLabels`. Falls back to the pod template labels.
fn extract_selector(kind: &str, spec: &Value) -> Option<LabelSelector> {
    let from_map = |v: &Value| -> Option<LabelSelector> {
        let map = v.as_object()?;
        let labels: BTreeMap<String, String> = map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        (!labels.is_empty()).then(|| LabelSelector::new(labels))
    };

    let selector = spec.get("selector");
    let direct = selector.and_then(|s| match s.get("matchLabels") {
        Some(match_labels) => from_map(match_labels),
        None => from_map(s),
    });

    if direct.is_some() || kind.eq_ignore_ascii_case("Service") {
        return direct;
    }

    spec.get("template")
        .and_then(|t| t.get("metadata"))
        .and_then(|m| m.get("labels"))
        .and_then(from_map)
}

/// Response structure for `kubectl get pods -o json`.
#[derive(Debug, Deserialize)]
pub struct PodListResponse {
    pub items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
pub struct PodItem {
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PodStatus {
    pub phase: Option<String>,
}

impl PodListResponse {
    /// Pod names, running pods first.
    pub fn into_pod_names(self) -> Vec<String> {
        let (mut running, others): (Vec<_>, Vec<_>) = self.items.into_iter().partition(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        });
        running.extend(others);
        running.into_iter().map(|p| p.metadata.name).collect()
    }
}
