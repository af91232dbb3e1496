//! Analyzer configuration
//!
//! Layered the usual way: built-in defaults, then an optional config file
//! under `~/.config/rightsize/`, then `RIGHTSIZE_*` environment variables.
//! Command-line flags are applied on top by the caller.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default lookback window
pub const DEFAULT_HISTORY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default headroom above the observed peak (0.5 = 50%)
pub const DEFAULT_MEMORY_BUFFER: f64 = 0.5;

/// Default recommendation floor in MiB
pub const DEFAULT_MIN_MEMORY_MIB: f64 = 10.0;

/// Default number of workloads analyzed in parallel
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default per-query timeout against the metrics backend
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Which targeted query a container falls back to when the bulk fetch missed it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    /// Match by pod name prefix
    #[default]
    Instance,
    /// Join against pod ownership
    Workload,
}

/// Configuration for one analysis run
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Namespaces to analyze (all when empty)
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Label selector applied when listing pods
    #[serde(default)]
    pub label_selector: Option<String>,

    /// How far back to look for usage samples
    #[serde(default = "default_history", deserialize_with = "crate::duration::deserialize")]
    pub history: Duration,

    /// Headroom multiplier above peak usage
    #[serde(default = "default_memory_buffer")]
    pub memory_buffer: f64,

    /// Lower bound for any recommendation, in MiB
    #[serde(default = "default_min_memory")]
    pub min_memory_mib: f64,

    /// Maximum workloads analyzed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Log progress lines instead of rendering a live spinner
    #[serde(default)]
    pub verbose: bool,

    /// Prometheus base URL (discovered in-cluster when unset)
    #[serde(default)]
    pub prometheus_url: Option<String>,

    /// Timeout applied to every metrics query
    #[serde(default = "default_query_timeout", deserialize_with = "crate::duration::deserialize")]
    pub query_timeout: Duration,

    /// Fallback query used when a container is missing from the bulk fetch
    #[serde(default)]
    pub fallback: FallbackStrategy,

    /// Root of the manifest repository for `apply`
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
}

fn default_history() -> Duration {
    DEFAULT_HISTORY
}

fn default_memory_buffer() -> f64 {
    DEFAULT_MEMORY_BUFFER
}

fn default_min_memory() -> f64 {
    DEFAULT_MIN_MEMORY_MIB
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_query_timeout() -> Duration {
    DEFAULT_QUERY_TIMEOUT
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            label_selector: None,
            history: DEFAULT_HISTORY,
            memory_buffer: DEFAULT_MEMORY_BUFFER,
            min_memory_mib: DEFAULT_MIN_MEMORY_MIB,
            concurrency: DEFAULT_CONCURRENCY,
            verbose: false,
            prometheus_url: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            fallback: FallbackStrategy::default(),
            repo_path: None,
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::config_file() {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("RIGHTSIZE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("namespaces"),
            )
            .build()?;

        let config: AnalyzerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Config file stem; the extension selects the format
    fn config_file() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("rightsize").join("config"))
    }

    /// Concurrency with non-positive values mapped to the default
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }

    /// Reject settings that would make the sizing math meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.memory_buffer.is_finite() || self.memory_buffer < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "memory buffer must be >= 0, got {}",
                self.memory_buffer
            )));
        }
        if !self.min_memory_mib.is_finite() || self.min_memory_mib <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "minimum memory must be > 0 MiB, got {}",
                self.min_memory_mib
            )));
        }
        if self.history.is_zero() {
            return Err(ConfigError::Invalid("history duration must be non-zero".into()));
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::Invalid("query timeout must be non-zero".into()));
        }
        Ok(())
    }
}
