//! Analysis command: recommend memory limits for one or more clusters

use anyhow::{Context, Result};
use rightsize_lib::metrics::{discover_prometheus, PrometheusClient};
use rightsize_lib::{
    AnalysisReport, Analyzer, AnalyzerConfig, KubeWorkloadSource, ProgressTracker, RunMetrics, StructuredLogger,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::output::{print_info, print_warning, render_report, write_output, OutputFormat};

/// Report and metrics of one cluster's run
pub struct AnalysisRun {
    pub report: AnalysisReport,
    pub metrics: RunMetrics,
}

/// Analyze the cluster behind `context` (the current context when `None`)
pub async fn run_analysis(config: &AnalyzerConfig, context: Option<&str>) -> Result<AnalysisRun> {
    let workloads = KubeWorkloadSource::connect(context).await?;
    let context_name = context.unwrap_or("current").to_string();
    info!(context = %context_name, cluster = %workloads.cluster_url(), "Connected to cluster");

    let prometheus = connect_prometheus(config, &workloads).await?;
    info!(endpoint = %prometheus.endpoint(), "Using Prometheus");

    let tracker = Arc::new(ProgressTracker::new(0, config.verbose));
    let analyzer = Analyzer::new(Arc::new(workloads), Arc::new(prometheus), config.clone())
        .with_progress(Arc::clone(&tracker))
        .with_logger(StructuredLogger::new(context_name));

    let progress = tracker.start();
    let result = analyzer.analyze().await;
    progress.finish().await;

    Ok(AnalysisRun {
        report: result?,
        metrics: analyzer.run_metrics().clone(),
    })
}

async fn connect_prometheus(config: &AnalyzerConfig, workloads: &KubeWorkloadSource) -> Result<PrometheusClient> {
    if let Some(url) = &config.prometheus_url {
        return PrometheusClient::new(url, config.query_timeout).context("Invalid Prometheus URL");
    }

    let endpoint = discover_prometheus(workloads.client())
        .await
        .context("No Prometheus URL given and none found in the cluster")?;
    Ok(endpoint.connect(workloads.client().clone(), config.query_timeout)?)
}

/// Run the analysis for every context and print one combined report
pub async fn run(
    config: &AnalyzerConfig,
    contexts: &[String],
    format: OutputFormat,
    output: Option<&Path>,
    print_metrics: bool,
) -> Result<()> {
    let targets: Vec<Option<&str>> = if contexts.is_empty() {
        vec![None]
    } else {
        contexts.iter().map(|c| Some(c.as_str())).collect()
    };

    let mut combined = AnalysisReport::default();
    let mut metrics = Vec::new();

    for context in targets {
        let run = run_analysis(config, context)
            .await
            .with_context(|| format!("Analysis failed for context {}", context.unwrap_or("current")))?;
        merge_report(&mut combined, run.report);
        metrics.push((context.unwrap_or("current").to_string(), run.metrics));
    }

    report_problems(&combined);

    if output.is_some() {
        colored::control::set_override(false);
    }
    let rendered = render_report(&combined, format)?;
    write_output(&rendered, output)?;

    if print_metrics {
        for (context, run_metrics) in &metrics {
            println!("# context: {}", context);
            print!("{}", run_metrics.render()?);
        }
    }

    Ok(())
}

/// Append one cluster's report onto the running total
pub fn merge_report(into: &mut AnalysisReport, report: AnalysisReport) {
    into.recommendations.extend(report.recommendations);
    into.skipped.extend(report.skipped);
    into.warnings.extend(report.warnings);
    into.workloads_total += report.workloads_total;
    into.workloads_failed += report.workloads_failed;
}

fn report_problems(report: &AnalysisReport) {
    for skipped in &report.skipped {
        print_warning(&format!("Skipped {}/{}: {}", skipped.namespace, skipped.name, skipped.reason));
    }
    for warning in &report.warnings {
        print_warning(warning);
    }
    if report.workloads_failed > 0 {
        print_info(&format!(
            "{} of {} workloads had metric query failures",
            report.workloads_failed, report.workloads_total
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rightsize_lib::SkippedInstance;

    #[test]
    fn test_merge_report_concatenates() {
        let mut combined = AnalysisReport::default();
        merge_report(
            &mut combined,
            AnalysisReport {
                warnings: vec!["a".to_string()],
                workloads_total: 3,
                workloads_failed: 1,
                ..Default::default()
            },
        );
        merge_report(
            &mut combined,
            AnalysisReport {
                skipped: vec![SkippedInstance {
                    namespace: "apps".to_string(),
                    name: "web-0".to_string(),
                    reason: "High restart count (7)".to_string(),
                }],
                warnings: vec!["b".to_string()],
                workloads_total: 2,
                ..Default::default()
            },
        );

        assert_eq!(combined.warnings, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(combined.skipped.len(), 1);
        assert_eq!(combined.workloads_total, 5);
        assert_eq!(combined.workloads_failed, 1);
    }
}
