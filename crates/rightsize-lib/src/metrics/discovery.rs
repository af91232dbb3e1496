//! Locate an in-cluster Prometheus when no URL is configured

use super::client::PrometheusClient;
use crate::error::MetricsError;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams};
use std::time::Duration;
use tracing::{debug, info};

/// Label selectors used by common Prometheus distributions, most specific first
pub const PROMETHEUS_SELECTORS: &[&str] = &[
    "app=kube-prometheus-stack-prometheus",
    "app=prometheus,component=server",
    "app=prometheus-server",
    "app=prometheus-operator-prometheus",
    "app=rancher-monitoring-prometheus",
    "app=prometheus-prometheus",
    "app.kubernetes.io/name=prometheus,app.kubernetes.io/component=server",
    "app=stack-prometheus",
];

/// Where a discovered Prometheus can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrometheusEndpoint {
    /// Cluster DNS address, usable when running inside the cluster
    Url(String),
    /// Service reached through the API server proxy
    ServiceProxy {
        namespace: String,
        service: String,
        port: i32,
    },
}

impl PrometheusEndpoint {
    /// Build a client for this endpoint
    pub fn connect(self, client: kube::Client, timeout: Duration) -> Result<PrometheusClient, MetricsError> {
        match self {
            PrometheusEndpoint::Url(url) => PrometheusClient::new(&url, timeout),
            PrometheusEndpoint::ServiceProxy {
                namespace,
                service,
                port,
            } => Ok(PrometheusClient::via_api_proxy(client, &namespace, &service, port, timeout)),
        }
    }

    fn for_service(namespace: String, service: String, port: i32, in_cluster: bool) -> Self {
        if in_cluster {
            PrometheusEndpoint::Url(format!("http://{service}.{namespace}.svc.cluster.local:{port}"))
        } else {
            PrometheusEndpoint::ServiceProxy {
                namespace,
                service,
                port,
            }
        }
    }
}

/// Search all namespaces for a Prometheus service
pub async fn discover_prometheus(client: &kube::Client) -> Result<PrometheusEndpoint, MetricsError> {
    let services: Api<Service> = Api::all(client.clone());
    let in_cluster = std::env::var_os("KUBERNETES_SERVICE_HOST").is_some();

    for selector in PROMETHEUS_SELECTORS {
        let list = match services.list(&ListParams::default().labels(selector)).await {
            Ok(list) => list,
            Err(e) => {
                debug!(selector, error = %e, "Service lookup failed");
                continue;
            }
        };

        for svc in list.items {
            let (Some(namespace), Some(name)) = (svc.metadata.namespace.clone(), svc.metadata.name.clone()) else {
                continue;
            };
            let Some(port) = service_port(&svc) else {
                continue;
            };

            info!(namespace = %namespace, service = %name, port, "Discovered Prometheus service");
            return Ok(PrometheusEndpoint::for_service(namespace, name, port, in_cluster));
        }
    }

    Err(MetricsError::Discovery(
        "no Prometheus service found in the cluster; pass --prometheus".to_string(),
    ))
}

/// Prefer a port named for the web UI, otherwise the first one
fn service_port(svc: &Service) -> Option<i32> {
    let ports = svc.spec.as_ref()?.ports.as_ref()?;
    ports
        .iter()
        .find(|p| matches!(p.name.as_deref(), Some("web" | "http" | "http-web")))
        .or_else(|| ports.first())
        .map(|p| p.port)
}
