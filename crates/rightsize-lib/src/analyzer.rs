//! Analysis orchestration
//!
//! A run moves through discovery, one bulk metrics fetch, bounded-concurrency
//! dispatch of one task per unique workload, and collection of the results.
//! Only listing and the bulk fetch can fail a run; everything that goes wrong
//! inside a single workload is reported on the [`AnalysisReport`] instead.

use crate::config::{AnalyzerConfig, FallbackStrategy};
use crate::duration::format_duration;
use crate::error::{Error, Result};
use crate::metrics::MetricsSource;
use crate::models::{AnalysisReport, BulkSeries, Instance, MetricPoint, Recommendation, ResourceMetrics};
use crate::observability::{RunMetrics, StructuredLogger};
use crate::progress::ProgressTracker;
use crate::recommend::RecommendationEngine;
use crate::workload::WorkloadSource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Runs the right-sizing analysis for one cluster
pub struct Analyzer {
    workloads: Arc<dyn WorkloadSource>,
    metrics: Arc<dyn MetricsSource>,
    engine: RecommendationEngine,
    config: AnalyzerConfig,
    progress: Option<Arc<ProgressTracker>>,
    run_metrics: RunMetrics,
    logger: StructuredLogger,
}

impl Analyzer {
    pub fn new(workloads: Arc<dyn WorkloadSource>, metrics: Arc<dyn MetricsSource>, config: AnalyzerConfig) -> Self {
        Self {
            engine: RecommendationEngine::from_config(&config),
            workloads,
            metrics,
            config,
            progress: None,
            run_metrics: RunMetrics::new(),
            logger: StructuredLogger::new("default"),
        }
    }

    /// Report per-workload progress to `tracker`
    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn run_metrics(&self) -> &RunMetrics {
        &self.run_metrics
    }

    /// Analyze every healthy running workload in the configured namespaces
    pub async fn analyze(&self) -> Result<AnalysisReport> {
        self.logger
            .log_run_started(&self.config.namespaces, &format_duration(self.config.history));

        let listing = self
            .workloads
            .list_running_instances(&self.config.namespaces, self.config.label_selector.as_deref())
            .await?;

        for skipped in &listing.skipped {
            self.logger.log_skipped(skipped);
        }
        self.run_metrics.add_unhealthy_skipped(listing.skipped.len());

        let (groups, mut warnings) = group_workloads(listing.running);
        self.run_metrics.add_workloads_discovered(groups.len());

        let mut report = AnalysisReport {
            skipped: listing.skipped,
            workloads_total: groups.len(),
            ..Default::default()
        };

        if groups.is_empty() {
            info!("No running workloads to analyze");
            report.warnings = warnings;
            self.logger.log_run_finished(0, report.skipped.len(), 0);
            return Ok(report);
        }

        let bulk = self.bulk_fetch().await?;

        if let Some(tracker) = &self.progress {
            tracker.update_total(groups.len());
        }

        let task = WorkloadTask {
            workloads: Arc::clone(&self.workloads),
            metrics: Arc::clone(&self.metrics),
            engine: self.engine,
            history: self.config.history,
            fallback: self.config.fallback,
            bulk: Arc::new(RwLock::new(bulk)),
            progress: self.progress.clone(),
            run_metrics: self.run_metrics.clone(),
            logger: self.logger.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let collected = Arc::new(Mutex::new(WorkloadOutcome::default()));
        let mut tasks = JoinSet::new();

        for (key, instance) in groups {
            let task = task.clone();
            let semaphore = Arc::clone(&semaphore);
            let collected = Arc::clone(&collected);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                debug!(workload = %key, "Dispatching workload");
                let outcome = task.run(instance).await;
                collected.lock().await.merge(outcome);
            });
        }

        let mut aborted = 0;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Workload analysis task aborted");
                warnings.push(format!("workload analysis task aborted: {e}"));
                aborted += 1;
            }
        }

        let outcome = std::mem::take(&mut *collected.lock().await);
        let mut recommendations = outcome.recommendations;
        recommendations.sort_by(|a, b| {
            (&a.namespace, &a.workload_name, &a.container).cmp(&(&b.namespace, &b.workload_name, &b.container))
        });

        let mut task_warnings = outcome.warnings;
        task_warnings.sort();
        warnings.extend(task_warnings);

        report.recommendations = recommendations;
        report.warnings = warnings;
        report.workloads_failed = outcome.failed + aborted;

        self.logger.log_run_finished(
            report.recommendations.len(),
            report.skipped.len(),
            report.workloads_failed,
        );
        Ok(report)
    }

    async fn bulk_fetch(&self) -> Result<BulkSeries> {
        let started = Instant::now();
        let bulk = self
            .metrics
            .bulk_query(&self.config.namespaces, self.config.history)
            .await
            .map_err(|source| Error::BulkFetch {
                namespaces: if self.config.namespaces.is_empty() {
                    "all".to_string()
                } else {
                    self.config.namespaces.join(", ")
                },
                source,
            })?;
        self.run_metrics.observe_query_latency(started.elapsed().as_secs_f64());

        info!(
            workloads = bulk.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bulk memory fetch complete"
        );
        Ok(bulk)
    }
}

/// Collapse replicas into one representative instance per workload key
///
/// The representative is the first instance by name. When instances sharing
/// a key resolve to different owning workloads a warning is returned, since
/// only the representative's containers will be analyzed.
pub fn group_workloads(mut instances: Vec<Instance>) -> (BTreeMap<String, Instance>, Vec<String>) {
    instances.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

    let mut groups: BTreeMap<String, Instance> = BTreeMap::new();
    let mut owners: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for instance in instances {
        let key = instance.workload_key();
        owners
            .entry(key.clone())
            .or_default()
            .insert(format!("{}/{}", instance.workload_kind(), instance.workload_name()));
        groups.entry(key).or_insert(instance);
    }

    let warnings = owners
        .into_iter()
        .filter(|(_, owners)| owners.len() > 1)
        .map(|(key, owners)| {
            let representative = groups.get(&key).map(|i| i.name.as_str()).unwrap_or_default();
            let message = format!(
                "instances grouped as {key} belong to different workloads ({}); analyzing {representative} only",
                owners.into_iter().collect::<Vec<_>>().join(", ")
            );
            warn!(workload = %key, "{}", message);
            message
        })
        .collect();

    (groups, warnings)
}

/// Keys a container's series may be filed under in the bulk result
///
/// Only exact workload identities are tried. A miss goes to the fallback
/// query rather than to a truncated name that may belong to a sibling.
fn bulk_keys(instance: &Instance) -> Vec<String> {
    let mut keys = vec![instance.workload_key()];
    let by_owner = format!("{}/{}", instance.namespace, instance.workload_name());
    if !keys.contains(&by_owner) {
        keys.push(by_owner);
    }
    keys
}

#[derive(Debug, Default)]
struct WorkloadOutcome {
    recommendations: Vec<Recommendation>,
    warnings: Vec<String>,
    failed: usize,
}

impl WorkloadOutcome {
    fn merge(&mut self, other: WorkloadOutcome) {
        self.recommendations.extend(other.recommendations);
        self.warnings.extend(other.warnings);
        self.failed += other.failed;
    }
}

/// Everything a single workload analysis needs, cheap to clone per task
#[derive(Clone)]
struct WorkloadTask {
    workloads: Arc<dyn WorkloadSource>,
    metrics: Arc<dyn MetricsSource>,
    engine: RecommendationEngine,
    history: Duration,
    fallback: FallbackStrategy,
    bulk: Arc<RwLock<BulkSeries>>,
    progress: Option<Arc<ProgressTracker>>,
    run_metrics: RunMetrics,
    logger: StructuredLogger,
}

impl WorkloadTask {
    async fn run(&self, instance: Instance) -> WorkloadOutcome {
        let namespace = instance.namespace.clone();
        let display = instance.instance_label().unwrap_or(&instance.name).to_string();
        if let Some(tracker) = &self.progress {
            tracker.start_processing(&namespace, &display);
        }

        let kind = instance.workload_kind();
        let name = instance.workload_name();
        let keys = bulk_keys(&instance);
        let mut outcome = WorkloadOutcome::default();

        for container in &instance.containers {
            let history = match self.from_bulk(&keys, &container.name).await {
                Some(points) => {
                    self.run_metrics.inc_bulk_hits();
                    points
                }
                None => match self.fallback_query(&instance, &name, &container.name).await {
                    Ok(points) => points,
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            workload = %name,
                            container = %container.name,
                            error = %e,
                            "Fallback metrics query failed"
                        );
                        self.run_metrics.inc_fallback_failures();
                        outcome.warnings.push(format!(
                            "{namespace}/{name}: failed to query metrics for container {}: {e}",
                            container.name
                        ));
                        outcome.failed = 1;
                        continue;
                    }
                },
            };

            if history.is_empty() {
                warn!(
                    namespace = %namespace,
                    workload = %name,
                    container = %container.name,
                    "No memory history, skipping container"
                );
                self.run_metrics.inc_containers_without_history();
                outcome.warnings.push(format!(
                    "{namespace}/{name}: no memory history for container {}",
                    container.name
                ));
                continue;
            }

            let (current_limit, current_request) = self.workloads.container_resource_config(&instance, &container.name);
            let metrics = ResourceMetrics {
                namespace: namespace.clone(),
                instance: instance.name.clone(),
                container: container.name.clone(),
                memory_usage: history,
                current_limit,
                current_request,
            };

            let rec = self.engine.recommend(&metrics, &kind, &name, instance.labels.clone());
            self.logger.log_recommendation(&rec);
            outcome.recommendations.push(rec);
        }

        self.run_metrics.inc_workloads_analyzed();
        if let Some(tracker) = &self.progress {
            tracker.finish_processing(&namespace, &display);
        }
        outcome
    }

    /// Samples from the bulk fetch, if it covered this container
    async fn from_bulk(&self, keys: &[String], container: &str) -> Option<Vec<MetricPoint>> {
        let bulk = self.bulk.read().await;
        keys.iter()
            .find_map(|key| bulk.get(key).and_then(|containers| containers.get(container)))
            .cloned()
    }

    /// Exactly one targeted query for a container the bulk fetch missed
    async fn fallback_query(
        &self,
        instance: &Instance,
        workload: &str,
        container: &str,
    ) -> std::result::Result<Vec<MetricPoint>, crate::error::MetricsError> {
        self.run_metrics.inc_fallback_queries();
        debug!(
            namespace = %instance.namespace,
            instance = %instance.name,
            container = %container,
            strategy = ?self.fallback,
            "Container missing from bulk fetch, querying directly"
        );

        let started = Instant::now();
        let result = match self.fallback {
            FallbackStrategy::Instance => {
                self.metrics
                    .query_by_instance(&instance.namespace, &instance.name, container, self.history)
                    .await
            }
            FallbackStrategy::Workload => {
                self.metrics
                    .query_by_workload(&instance.namespace, workload, container, self.history)
                    .await
            }
        };
        self.run_metrics.observe_query_latency(started.elapsed().as_secs_f64());
        result
    }
}
