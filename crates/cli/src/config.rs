//! Merge command-line flags over the layered analyzer configuration

use crate::AnalysisArgs;
use anyhow::{Context, Result};
use rightsize_lib::AnalyzerConfig;
use std::path::PathBuf;

/// Defaults, config file and `RIGHTSIZE_*` env, then flags on top
pub fn resolve(args: &AnalysisArgs, verbose: bool, repo: Option<PathBuf>) -> Result<AnalyzerConfig> {
    let base = AnalyzerConfig::load().context("Failed to load configuration")?;
    let config = apply_flags(base, args, verbose, repo);
    config.validate().context("Invalid command-line options")?;
    Ok(config)
}

/// Overlay explicitly given flags; absent flags keep the loaded value
pub fn apply_flags(mut config: AnalyzerConfig, args: &AnalysisArgs, verbose: bool, repo: Option<PathBuf>) -> AnalyzerConfig {
    if !args.namespaces.is_empty() {
        config.namespaces = args.namespaces.clone();
    }
    if let Some(selector) = &args.selector {
        config.label_selector = Some(selector.clone());
    }
    if let Some(history) = args.history {
        config.history = history;
    }
    if let Some(buffer) = args.memory_buffer {
        config.memory_buffer = buffer;
    }
    if let Some(min) = args.min_memory {
        config.min_memory_mib = min;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(url) = &args.prometheus {
        config.prometheus_url = Some(url.clone());
    }
    if let Some(fallback) = args.fallback {
        config.fallback = fallback.into();
    }
    if repo.is_some() {
        config.repo_path = repo;
    }
    config.verbose |= verbose;
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FallbackArg;
    use rightsize_lib::FallbackStrategy;
    use std::time::Duration;

    #[test]
    fn test_flags_override_loaded_values() {
        let base = AnalyzerConfig {
            namespaces: vec!["from-file".to_string()],
            memory_buffer: 0.25,
            ..Default::default()
        };
        let args = AnalysisArgs {
            namespaces: vec!["apps".to_string(), "media".to_string()],
            history: Some(Duration::from_secs(3600)),
            fallback: Some(FallbackArg::Workload),
            ..Default::default()
        };

        let config = apply_flags(base, &args, true, Some(PathBuf::from("/repo")));
        assert_eq!(config.namespaces, vec!["apps".to_string(), "media".to_string()]);
        assert_eq!(config.history, Duration::from_secs(3600));
        assert_eq!(config.memory_buffer, 0.25);
        assert_eq!(config.fallback, FallbackStrategy::Workload);
        assert_eq!(config.repo_path, Some(PathBuf::from("/repo")));
        assert!(config.verbose);
    }

    #[test]
    fn test_absent_flags_keep_defaults() {
        let config = apply_flags(AnalyzerConfig::default(), &AnalysisArgs::default(), false, None);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.min_memory_mib, 10.0);
        assert!(config.prometheus_url.is_none());
        assert!(!config.verbose);
    }
}
