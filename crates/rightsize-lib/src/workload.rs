//! Running workload discovery
//!
//! Lists pods from the orchestrator, drops anything that is not running,
//! and sets aside unhealthy pods (crash-looping or restarting too often)
//! so they are reported rather than analyzed.

use crate::error::{Error, Result};
use crate::models::{ContainerSpec, Instance, InstanceListing, OwnerRef, ResourceQuantity, SkippedInstance};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

/// Restarts above this count mark a pod unhealthy
pub const MAX_RESTARTS: i32 = 5;

const CRASH_LOOP: &str = "CrashLoopBackOff";

/// Orchestrator view of running instances
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Running instances in `namespaces` (all when empty), split into
    /// healthy ones and ones skipped as unhealthy
    async fn list_running_instances(
        &self,
        namespaces: &[String],
        label_selector: Option<&str>,
    ) -> Result<InstanceListing>;

    /// Configured memory limit and request of a container; unset tiers
    /// come back as [`ResourceQuantity::unset`]
    fn container_resource_config(&self, instance: &Instance, container: &str) -> (ResourceQuantity, ResourceQuantity) {
        instance
            .container(container)
            .map(|c| (c.memory_limit.clone(), c.memory_request.clone()))
            .unwrap_or_default()
    }
}

/// [`WorkloadSource`] backed by the Kubernetes API
pub struct KubeWorkloadSource {
    client: Client,
    context: Option<String>,
    cluster_url: String,
}

impl KubeWorkloadSource {
    /// Connect using the given kubeconfig context, or the inferred default
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(ctx) => {
                let kubeconfig = Kubeconfig::read().map_err(|e| Error::KubeConfig(e.to_string()))?;
                Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: Some(ctx.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| Error::KubeConfig(format!("context {ctx}: {e}")))?
            }
            None => Config::infer().await.map_err(|e| Error::KubeConfig(e.to_string()))?,
        };

        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(|e| Error::KubeConfig(e.to_string()))?;

        Ok(Self {
            client,
            context: context.map(str::to_string),
            cluster_url,
        })
    }

    /// Underlying API client, shared with Prometheus discovery
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }

    async fn list_pods(&self, api: Api<Pod>, scope: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }

        let list = api.list(&params).await.map_err(|source| Error::Orchestrator {
            namespace: scope.to_string(),
            source,
        })?;

        debug!(namespace = %scope, pods = list.items.len(), "Listed pods");
        Ok(list.items)
    }
}

#[async_trait]
impl WorkloadSource for KubeWorkloadSource {
    async fn list_running_instances(
        &self,
        namespaces: &[String],
        label_selector: Option<&str>,
    ) -> Result<InstanceListing> {
        let mut pods = Vec::new();

        if namespaces.is_empty() {
            let api: Api<Pod> = Api::all(self.client.clone());
            pods.extend(self.list_pods(api, "<all>", label_selector).await?);
        } else {
            for namespace in namespaces {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                pods.extend(self.list_pods(api, namespace, label_selector).await?);
            }
        }

        let listing = partition_pods(pods);
        info!(
            running = listing.running.len(),
            unhealthy = listing.skipped.len(),
            "Discovered running instances"
        );
        Ok(listing)
    }
}

/// Keep running pods, separating unhealthy ones
pub fn partition_pods(pods: Vec<Pod>) -> InstanceListing {
    let mut listing = InstanceListing::default();

    for pod in pods {
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        if phase != Some("Running") {
            continue;
        }

        let instance = instance_from_pod(&pod);
        match unhealthy_reason(&pod) {
            Some(reason) => {
                debug!(namespace = %instance.namespace, pod = %instance.name, %reason, "Skipping unhealthy pod");
                listing.skipped.push(SkippedInstance {
                    namespace: instance.namespace,
                    name: instance.name,
                    reason,
                });
            }
            None => listing.running.push(instance),
        }
    }

    listing
}

/// Why a running pod should not be analyzed, if at all
fn unhealthy_reason(pod: &Pod) -> Option<String> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;

    for status in statuses {
        let waiting = status
            .state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref());
        if waiting == Some(CRASH_LOOP) {
            return Some(format!("{CRASH_LOOP} (container {})", status.name));
        }
        if status.restart_count > MAX_RESTARTS {
            return Some(format!("High restart count ({})", status.restart_count));
        }
    }

    None
}

fn instance_from_pod(pod: &Pod) -> Instance {
    let meta = &pod.metadata;

    let owner = meta.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.controller == Some(true))
            .or_else(|| refs.first())
            .map(|r| OwnerRef {
                kind: r.kind.clone(),
                name: r.name.clone(),
            })
    });

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(container_spec).collect())
        .unwrap_or_default();

    Instance {
        namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        name: meta.name.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        owner,
        containers,
    }
}

fn container_spec(container: &Container) -> ContainerSpec {
    let resources = container.resources.as_ref();
    let memory = |tier: Option<&std::collections::BTreeMap<String, Quantity>>| {
        tier.and_then(|t| t.get("memory"))
            .and_then(|q| parse_memory_quantity(&q.0))
            .map(ResourceQuantity::mebibytes)
            .unwrap_or_default()
    };

    ContainerSpec {
        name: container.name.clone(),
        memory_limit: memory(resources.and_then(|r| r.limits.as_ref())),
        memory_request: memory(resources.and_then(|r| r.requests.as_ref())),
    }
}

/// Parse a memory quantity (`128Mi`, `1Gi`, `500M`, `1e9`) into MiB
pub fn parse_memory_quantity(quantity: &str) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("m", 1e-3),
    ];

    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }

    let bytes = SUFFIXES
        .iter()
        .find_map(|(suffix, factor)| {
            quantity
                .strip_suffix(suffix)
                .map(|num| num.parse::<f64>().map(|n| n * factor))
        })
        .unwrap_or_else(|| quantity.parse::<f64>())
        .ok()?;

    if !bytes.is_finite() || bytes < 0.0 {
        return None;
    }

    Some(bytes / crate::models::MIB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn pod(name: &str, phase: &str, restarts: i32, waiting: Option<&str>) -> Pod {
        let mut limits = BTreeMap::new();
        limits.insert("memory".to_string(), Quantity("256Mi".to_string()));
        let mut requests = BTreeMap::new();
        requests.insert("memory".to_string(), Quantity("128Mi".to_string()));

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/instance".to_string(),
                    "web".to_string(),
                )])),
                owner_references: Some(vec![OwnerReference {
                    kind: "ReplicaSet".to_string(),
                    name: "web-7d4b9c8f6".to_string(),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![
                    Container {
                        name: "app".to_string(),
                        resources: Some(ResourceRequirements {
                            limits: Some(limits),
                            requests: Some(requests),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "app".to_string(),
                    restart_count: restarts,
                    state: waiting.map(|reason| ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some(reason.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_partition_keeps_running_healthy_pods() {
        let listing = partition_pods(vec![
            pod("web-7d4b9c8f6-aaaaa", "Running", 0, None),
            pod("web-7d4b9c8f6-bbbbb", "Pending", 0, None),
            pod("web-7d4b9c8f6-ccccc", "Succeeded", 0, None),
        ]);
        assert_eq!(listing.running.len(), 1);
        assert!(listing.skipped.is_empty());

        let instance = &listing.running[0];
        assert_eq!(instance.workload_kind(), "Deployment");
        assert_eq!(instance.workload_name(), "web");
        assert_eq!(instance.instance_label(), Some("web"));
    }

    #[test]
    fn test_high_restart_count_is_skipped() {
        let listing = partition_pods(vec![pod("web-7d4b9c8f6-aaaaa", "Running", 6, None)]);
        assert!(listing.running.is_empty());
        assert_eq!(listing.skipped.len(), 1);
        assert_eq!(listing.skipped[0].reason, "High restart count (6)");
        assert!(listing.skipped[0].reason.contains("restart count"));

        // Exactly at the threshold is still healthy
        let listing = partition_pods(vec![pod("web-7d4b9c8f6-aaaaa", "Running", 5, None)]);
        assert_eq!(listing.running.len(), 1);
    }

    #[test]
    fn test_crash_loop_is_skipped() {
        let listing = partition_pods(vec![pod("web-7d4b9c8f6-aaaaa", "Running", 1, Some("CrashLoopBackOff"))]);
        assert!(listing.running.is_empty());
        assert!(listing.skipped[0].reason.starts_with("CrashLoopBackOff"));
    }

    #[test]
    fn test_container_resources_read_from_spec() {
        let listing = partition_pods(vec![pod("web-7d4b9c8f6-aaaaa", "Running", 0, None)]);
        let instance = &listing.running[0];

        struct Static;
        #[async_trait]
        impl WorkloadSource for Static {
            async fn list_running_instances(&self, _: &[String], _: Option<&str>) -> Result<InstanceListing> {
                Ok(InstanceListing::default())
            }
        }

        let (limit, request) = Static.container_resource_config(instance, "app");
        assert_eq!(limit, ResourceQuantity::mebibytes(256.0));
        assert_eq!(request, ResourceQuantity::mebibytes(128.0));

        let (limit, request) = Static.container_resource_config(instance, "sidecar");
        assert!(!limit.is_set());
        assert!(!request.is_set());

        let (limit, _) = Static.container_resource_config(instance, "missing");
        assert!(!limit.is_set());
    }

    #[test]
    fn test_parse_memory_quantity() {
        assert_eq!(parse_memory_quantity("128Mi"), Some(128.0));
        assert_eq!(parse_memory_quantity("1Gi"), Some(1024.0));
        assert_eq!(parse_memory_quantity("512Ki"), Some(0.5));
        assert_eq!(parse_memory_quantity("1048576"), Some(1.0));
        assert_eq!(parse_memory_quantity("1e6").map(|v| (v * 1e6).round()), Some(953674.0));
        assert!((parse_memory_quantity("500M").unwrap() - 476.837158203125).abs() < 1e-9);
        assert_eq!(parse_memory_quantity(""), None);
        assert_eq!(parse_memory_quantity("lots"), None);
    }
}
