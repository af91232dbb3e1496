//! Historical memory usage
//!
//! [`MetricsSource`] is the seam between the analyzer and the time-series
//! backend. [`PrometheusClient`] is the production implementation; tests
//! substitute in-memory fakes.

pub mod discovery;
pub mod client;
pub mod query;

use crate::error::MetricsError;
use crate::models::{BulkSeries, MetricPoint};
use async_trait::async_trait;
use std::time::Duration;

pub use discovery::{discover_prometheus, PrometheusEndpoint};
pub use client::PrometheusClient;

/// Working-set history provider
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Samples for one container across pods sharing the instance's name prefix
    async fn query_by_instance(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        history: Duration,
    ) -> Result<Vec<MetricPoint>, MetricsError>;

    /// Samples for one container across all pods owned by a workload
    async fn query_by_workload(
        &self,
        namespace: &str,
        workload: &str,
        container: &str,
        history: Duration,
    ) -> Result<Vec<MetricPoint>, MetricsError>;

    /// All containers in the given namespaces (all namespaces when empty),
    /// keyed `namespace/workload -> container`
    async fn bulk_query(&self, namespaces: &[String], history: Duration) -> Result<BulkSeries, MetricsError>;
}
