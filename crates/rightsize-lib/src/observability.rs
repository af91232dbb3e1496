//! Observability for analysis runs
//!
//! Provides:
//! - Per-run Prometheus counters and a query latency histogram
//! - Structured logging of recommendations and skips with tracing

use crate::models::{Recommendation, SkippedInstance};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use tracing::{info, warn};

/// Histogram buckets for metrics backend latency (in seconds)
const QUERY_LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Counters for one analysis run
///
/// Each run owns its own registry so parallel runs (one per kube context,
/// or concurrent tests) never share state.
#[derive(Clone)]
pub struct RunMetrics {
    registry: Registry,
    workloads_discovered: IntCounter,
    workloads_analyzed: IntCounter,
    unhealthy_skipped: IntCounter,
    containers_without_history: IntCounter,
    bulk_hits: IntCounter,
    fallback_queries: IntCounter,
    fallback_failures: IntCounter,
    query_latency_seconds: Histogram,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("fresh registry has no duplicate metrics");
    counter
}

impl RunMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let query_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rightsize_query_latency_seconds",
                "Time spent waiting on the metrics backend",
            )
            .buckets(QUERY_LATENCY_BUCKETS.to_vec()),
        )
        .expect("valid histogram definition");
        registry
            .register(Box::new(query_latency_seconds.clone()))
            .expect("fresh registry has no duplicate metrics");

        Self {
            workloads_discovered: counter(
                &registry,
                "rightsize_workloads_discovered_total",
                "Unique workloads found after grouping replicas",
            ),
            workloads_analyzed: counter(
                &registry,
                "rightsize_workloads_analyzed_total",
                "Workloads that finished analysis",
            ),
            unhealthy_skipped: counter(
                &registry,
                "rightsize_unhealthy_instances_skipped_total",
                "Running instances skipped as unhealthy",
            ),
            containers_without_history: counter(
                &registry,
                "rightsize_containers_without_history_total",
                "Containers skipped for lack of usage samples",
            ),
            bulk_hits: counter(
                &registry,
                "rightsize_bulk_hits_total",
                "Containers served from the bulk fetch",
            ),
            fallback_queries: counter(
                &registry,
                "rightsize_fallback_queries_total",
                "Targeted queries issued for containers missing from the bulk fetch",
            ),
            fallback_failures: counter(
                &registry,
                "rightsize_fallback_failures_total",
                "Targeted queries that failed",
            ),
            query_latency_seconds,
            registry,
        }
    }

    pub fn add_workloads_discovered(&self, n: usize) {
        self.workloads_discovered.inc_by(n as u64);
    }

    pub fn inc_workloads_analyzed(&self) {
        self.workloads_analyzed.inc();
    }

    pub fn add_unhealthy_skipped(&self, n: usize) {
        self.unhealthy_skipped.inc_by(n as u64);
    }

    pub fn inc_containers_without_history(&self) {
        self.containers_without_history.inc();
    }

    pub fn inc_bulk_hits(&self) {
        self.bulk_hits.inc();
    }

    pub fn inc_fallback_queries(&self) {
        self.fallback_queries.inc();
    }

    pub fn inc_fallback_failures(&self) {
        self.fallback_failures.inc();
    }

    /// Record one backend round trip
    pub fn observe_query_latency(&self, duration_secs: f64) {
        self.query_latency_seconds.observe(duration_secs);
    }

    pub fn workloads_analyzed(&self) -> u64 {
        self.workloads_analyzed.get()
    }

    pub fn bulk_hits(&self) -> u64 {
        self.bulk_hits.get()
    }

    pub fn fallback_queries(&self) -> u64 {
        self.fallback_queries.get()
    }

    pub fn fallback_failures(&self) -> u64 {
        self.fallback_failures.get()
    }

    pub fn containers_without_history(&self) -> u64 {
        self.containers_without_history.get()
    }

    /// Text exposition of every metric in this run
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for analysis events
#[derive(Clone)]
pub struct StructuredLogger {
    context: String,
}

impl StructuredLogger {
    /// `context` names the cluster the run targets
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }

    pub fn log_run_started(&self, namespaces: &[String], history: &str) {
        info!(
            event = "analysis_started",
            context = %self.context,
            namespaces = ?namespaces,
            history = %history,
            "Starting memory analysis"
        );
    }

    pub fn log_recommendation(&self, rec: &Recommendation) {
        info!(
            event = "recommendation_generated",
            context = %self.context,
            namespace = %rec.namespace,
            workload = %rec.workload_name,
            kind = %rec.workload_kind,
            container = %rec.container,
            current_limit = %rec.current_limit,
            recommended_limit = %rec.recommended_limit,
            percent_change = rec.percent_change,
            severity = %rec.severity,
            request_lowered = rec.request_lowered,
            "Generated memory recommendation"
        );
    }

    pub fn log_skipped(&self, skipped: &SkippedInstance) {
        warn!(
            event = "instance_skipped",
            context = %self.context,
            namespace = %skipped.namespace,
            instance = %skipped.name,
            reason = %skipped.reason,
            "Skipping unhealthy instance"
        );
    }

    pub fn log_run_finished(&self, recommendations: usize, skipped: usize, failed: usize) {
        info!(
            event = "analysis_finished",
            context = %self.context,
            recommendations,
            skipped,
            failed,
            "Memory analysis finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_do_not_share_counters() {
        let first = RunMetrics::new();
        let second = RunMetrics::new();

        first.inc_bulk_hits();
        first.inc_bulk_hits();
        second.inc_fallback_queries();

        assert_eq!(first.bulk_hits(), 2);
        assert_eq!(second.bulk_hits(), 0);
        assert_eq!(second.fallback_queries(), 1);
    }

    #[test]
    fn test_render_text_exposition() {
        let metrics = RunMetrics::new();
        metrics.add_workloads_discovered(3);
        metrics.observe_query_latency(0.2);

        let text = metrics.render().unwrap();
        assert!(text.contains("rightsize_workloads_discovered_total 3"));
        assert!(text.contains("rightsize_query_latency_seconds_count 1"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("kind-dev");
        assert_eq!(logger.context, "kind-dev");
    }
}
