//! Memory right-sizing library
//!
//! This crate provides the core functionality for:
//! - Discovering running workloads from the cluster
//! - Fetching historical working-set usage from Prometheus
//! - Sizing memory limits from peak usage plus headroom
//! - Patching GitOps manifests with the recommended values
//! - Run metrics and structured logging

pub mod analyzer;
pub mod config;
pub mod duration;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod progress;
pub mod recommend;
pub mod workload;

pub use analyzer::Analyzer;
pub use config::{AnalyzerConfig, FallbackStrategy};
pub use error::{ConfigError, Error, ManifestError, MetricsError, Result};
pub use metrics::{MetricsSource, PrometheusClient};
pub use models::*;
pub use observability::{RunMetrics, StructuredLogger};
pub use progress::ProgressTracker;
pub use recommend::RecommendationEngine;
pub use workload::{KubeWorkloadSource, WorkloadSource};
