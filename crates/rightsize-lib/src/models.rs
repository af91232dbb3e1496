//! Core data models for memory right-sizing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Label used to collapse replicas into a single workload
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Bytes per mebibyte
pub const MIB: f64 = 1024.0 * 1024.0;

/// A single working-set sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    /// Raw memory bytes
    pub value: f64,
}

/// Bulk fetch results: `namespace/workload -> container -> samples`
pub type BulkSeries = HashMap<String, HashMap<String, Vec<MetricPoint>>>;

/// A memory quantity as configured on a container
///
/// `unit` is empty when nothing is configured at that tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    pub value: f64,
    pub unit: String,
}

impl ResourceQuantity {
    pub fn mebibytes(value: f64) -> Self {
        Self {
            value,
            unit: "Mi".to_string(),
        }
    }

    pub fn unset() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        !self.unit.is_empty()
    }

    /// Manifest-ready value, rounded up to a whole unit
    pub fn manifest_value(&self) -> Option<String> {
        if !self.is_set() {
            return None;
        }
        Some(format!("{}{}", self.value.ceil() as i64, self.unit))
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.manifest_value() {
            Some(v) => f.write_str(&v),
            None => f.write_str("N/A"),
        }
    }
}

/// Per-container working set for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub namespace: String,
    pub instance: String,
    pub container: String,
    pub memory_usage: Vec<MetricPoint>,
    pub current_limit: ResourceQuantity,
    pub current_request: ResourceQuantity,
}

/// Display-only classification of a sizing change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Bucket an absolute percent change
    pub fn from_change(percent_change: f64) -> Self {
        let abs = percent_change.abs();
        if abs > 50.0 {
            Severity::Critical
        } else if abs > 25.0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory sizing recommendation for one (workload, container) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub namespace: String,
    pub workload_name: String,
    pub workload_kind: String,
    pub container: String,
    pub current_limit: ResourceQuantity,
    pub current_request: ResourceQuantity,
    pub recommended_limit: ResourceQuantity,
    pub recommended_request: ResourceQuantity,
    pub percent_change: f64,
    pub severity: Severity,
    pub request_lowered: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing)]
    pub history: Vec<MetricPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
}

impl Recommendation {
    /// Highest observed sample in MiB
    pub fn peak_mib(&self) -> f64 {
        self.history
            .iter()
            .map(|p| p.value / MIB)
            .fold(0.0, f64::max)
    }

    /// Attach the manifest this recommendation will be written to
    pub fn with_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }
}

/// Owner reference of a running instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// Configured memory of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub memory_limit: ResourceQuantity,
    pub memory_request: ResourceQuantity,
}

/// A running pod, reduced to what the analysis needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub owner: Option<OwnerRef>,
    pub containers: Vec<ContainerSpec>,
}

impl Instance {
    /// Value of the instance label, if present and non-empty
    pub fn instance_label(&self) -> Option<&str> {
        self.labels
            .get(INSTANCE_LABEL)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Identity used to collapse replicas: `namespace/<instance label>`,
    /// or `namespace/<pod name>` for unlabeled singletons
    pub fn workload_key(&self) -> String {
        match self.instance_label() {
            Some(label) => format!("{}/{}", self.namespace, label),
            None => format!("{}/{}", self.namespace, self.name),
        }
    }

    /// Kind of the owning workload
    pub fn workload_kind(&self) -> String {
        match &self.owner {
            Some(owner) => match owner.kind.as_str() {
                "ReplicaSet" => "Deployment".to_string(),
                "StatefulSet" | "DaemonSet" | "Job" | "CronJob" => owner.kind.clone(),
                _ => "Pod".to_string(),
            },
            None => "Pod".to_string(),
        }
    }

    /// Name of the owning workload
    pub fn workload_name(&self) -> String {
        match &self.owner {
            Some(owner) if owner.kind == "ReplicaSet" => strip_hash_segment(&owner.name).to_string(),
            Some(owner) => owner.name.clone(),
            None => self.name.clone(),
        }
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Drop the trailing `-<hash>` segment a ReplicaSet appends to its Deployment
fn strip_hash_segment(name: &str) -> &str {
    match name.rsplit_once('-') {
        Some((base, hash))
            if !base.is_empty()
                && !hash.is_empty()
                && hash.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            base
        }
        _ => name,
    }
}

/// An instance excluded from analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedInstance {
    pub namespace: String,
    pub name: String,
    pub reason: String,
}

/// Healthy running instances plus the ones filtered out
#[derive(Debug, Clone, Default)]
pub struct InstanceListing {
    pub running: Vec<Instance>,
    pub skipped: Vec<SkippedInstance>,
}

/// Outcome of one analysis run
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub recommendations: Vec<Recommendation>,
    pub skipped: Vec<SkippedInstance>,
    pub warnings: Vec<String>,
    pub workloads_total: usize,
    pub workloads_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(owner: Option<(&str, &str)>, labels: &[(&str, &str)]) -> Instance {
        Instance {
            namespace: "default".to_string(),
            name: "web-7d4b9c8f6-x2k4z".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            owner: owner.map(|(kind, name)| OwnerRef {
                kind: kind.to_string(),
                name: name.to_string(),
            }),
            containers: vec![],
        }
    }

    #[test]
    fn test_workload_kind_from_owner() {
        assert_eq!(instance(Some(("ReplicaSet", "web-7d4b9c8f6")), &[]).workload_kind(), "Deployment");
        assert_eq!(instance(Some(("StatefulSet", "db")), &[]).workload_kind(), "StatefulSet");
        assert_eq!(instance(Some(("DaemonSet", "agent")), &[]).workload_kind(), "DaemonSet");
        assert_eq!(instance(Some(("Node", "node-1")), &[]).workload_kind(), "Pod");
        assert_eq!(instance(None, &[]).workload_kind(), "Pod");
    }

    #[test]
    fn test_workload_name_strips_replicaset_hash() {
        assert_eq!(instance(Some(("ReplicaSet", "web-7d4b9c8f6")), &[]).workload_name(), "web");
        assert_eq!(instance(Some(("ReplicaSet", "my-api-5f6c7d")), &[]).workload_name(), "my-api");
        assert_eq!(instance(Some(("StatefulSet", "db")), &[]).workload_name(), "db");
        assert_eq!(instance(None, &[]).workload_name(), "web-7d4b9c8f6-x2k4z");
    }

    #[test]
    fn test_workload_key_prefers_instance_label() {
        let labeled = instance(None, &[(INSTANCE_LABEL, "web")]);
        assert_eq!(labeled.workload_key(), "default/web");

        let unlabeled = instance(None, &[]);
        assert_eq!(unlabeled.workload_key(), "default/web-7d4b9c8f6-x2k4z");

        let empty = instance(None, &[(INSTANCE_LABEL, "")]);
        assert_eq!(empty.workload_key(), "default/web-7d4b9c8f6-x2k4z");
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(Severity::from_change(51.0), Severity::Critical);
        assert_eq!(Severity::from_change(-75.0), Severity::Critical);
        assert_eq!(Severity::from_change(50.0), Severity::Warning);
        assert_eq!(Severity::from_change(-30.0), Severity::Warning);
        assert_eq!(Severity::from_change(25.0), Severity::Info);
        assert_eq!(Severity::from_change(0.0), Severity::Info);
    }

    #[test]
    fn test_resource_quantity_display() {
        assert_eq!(ResourceQuantity::mebibytes(149.2).to_string(), "150Mi");
        assert_eq!(ResourceQuantity::unset().to_string(), "N/A");
        assert_eq!(ResourceQuantity::unset().manifest_value(), None);
    }
}
