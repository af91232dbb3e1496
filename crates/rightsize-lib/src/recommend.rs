//! Peak-plus-headroom memory sizing
//!
//! Turns a container's working-set history and its current configuration
//! into a [`Recommendation`]. Pure: the same inputs always produce the same
//! output.

use crate::config::{AnalyzerConfig, DEFAULT_MEMORY_BUFFER, DEFAULT_MIN_MEMORY_MIB};
use crate::models::{MetricPoint, Recommendation, ResourceMetrics, ResourceQuantity, Severity, MIB};
use std::collections::BTreeMap;

/// Sizing engine parameters
#[derive(Debug, Clone, Copy)]
pub struct RecommendationEngine {
    /// Headroom multiplier above the observed peak
    memory_buffer: f64,
    /// Floor for any recommendation, in MiB
    min_memory_mib: f64,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUFFER, DEFAULT_MIN_MEMORY_MIB)
    }
}

impl RecommendationEngine {
    pub fn new(memory_buffer: f64, min_memory_mib: f64) -> Self {
        Self {
            memory_buffer,
            min_memory_mib,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(config.memory_buffer, config.min_memory_mib)
    }

    /// Build the recommendation for one container
    pub fn recommend(
        &self,
        metrics: &ResourceMetrics,
        workload_kind: &str,
        workload_name: &str,
        labels: BTreeMap<String, String>,
    ) -> Recommendation {
        let recommended_limit = self.recommended_limit(&metrics.memory_usage);

        // A request may never exceed its own limit
        let (recommended_request, request_lowered) =
            if metrics.current_request.value > recommended_limit.value {
                (ResourceQuantity::mebibytes(recommended_limit.value), true)
            } else {
                (metrics.current_request.clone(), false)
            };

        let percent_change =
            percent_change(metrics.current_limit.value, recommended_limit.value);

        Recommendation {
            namespace: metrics.namespace.clone(),
            workload_name: workload_name.to_string(),
            workload_kind: workload_kind.to_string(),
            container: metrics.container.clone(),
            current_limit: metrics.current_limit.clone(),
            current_request: metrics.current_request.clone(),
            recommended_limit,
            recommended_request,
            percent_change,
            severity: Severity::from_change(percent_change),
            request_lowered,
            labels,
            history: metrics.memory_usage.clone(),
            manifest_path: None,
        }
    }

    /// Peak usage plus headroom, floored at the minimum and rounded up to a whole MiB
    pub fn recommended_limit(&self, usage: &[MetricPoint]) -> ResourceQuantity {
        if usage.is_empty() {
            return ResourceQuantity::mebibytes(self.min_memory_mib);
        }

        let peak = usage.iter().map(|p| p.value / MIB).fold(0.0, f64::max);
        let buffered = (peak * (1.0 + self.memory_buffer)).max(self.min_memory_mib);

        ResourceQuantity::mebibytes(buffered.ceil())
    }
}

/// Relative change of the limit in percent
///
/// Going from nothing to something reports 100%.
pub fn percent_change(current: f64, recommended: f64) -> f64 {
    if current == 0.0 {
        if recommended == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (recommended - current) / current * 100.0
    }
}
