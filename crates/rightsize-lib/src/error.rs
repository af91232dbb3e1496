//! Error types
//!
//! Run-aborting failures (listing workloads, the bulk metrics fetch) surface
//! as [`Error`]. Per-workload problems never do; the analyzer records them
//! as warnings and skip counts on the report instead.

use std::path::PathBuf;

/// Library result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for an analysis or apply run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to list pods in namespace {namespace}: {source}")]
    Orchestrator {
        namespace: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to create Kubernetes client: {0}")]
    KubeConfig(String),

    #[error("failed to fetch bulk memory data for namespaces [{namespaces}]: {source}")]
    BulkFetch {
        namespaces: String,
        #[source]
        source: MetricsError,
    },

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Metrics backend failures
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Kubernetes API proxy request failed: {0}")]
    Proxy(#[from] kube::Error),

    #[error("Prometheus returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query failed ({query}): {message}")]
    Query { query: String, message: String },

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to parse Prometheus response: {0}")]
    Parse(String),

    #[error("invalid Prometheus URL: {0}")]
    InvalidUrl(String),

    #[error("failed to discover Prometheus endpoint: {0}")]
    Discovery(String),
}

/// Manifest location and patching failures
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("no matching containers found in manifest {}", .0.display())]
    NoMatchingSection(PathBuf),

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid or unloadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid duration '{0}'")]
    Duration(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
