//! PromQL builders and query-window math

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Sample target for targeted per-container queries
pub const INSTANCE_TARGET_POINTS: u32 = 500;

/// Sample target for the bulk query, which returns many series at once
pub const BULK_TARGET_POINTS: u32 = 300;

/// Never sample more often than once a minute
pub const MIN_STEP: Duration = Duration::from_secs(60);

/// cAdvisor working-set series, excluding pause containers
const WORKING_SET_SELECTOR: &str =
    r#"container_memory_working_set_bytes{job="kubelet", metrics_path="/metrics/cadvisor", image!="""#;

/// Owner join mapping each pod to its workload name
///
/// Only ReplicaSet owners lose their trailing hash segment; StatefulSet and
/// DaemonSet names are already workload names and are joined verbatim.
/// With `workload` set, each branch matches that one workload exactly.
fn owner_join(owner_filter: &str, workload: Option<&str>) -> String {
    let (replicaset_name, owner_name) = match workload {
        Some(w) => (format!(r#", owner_name=~"{w}-[a-z0-9]+""#), format!(r#", owner_name="{w}""#)),
        None => (String::new(), String::new()),
    };
    format!(
        r#"* on(namespace, pod) group_left(owner_name) (label_replace(max by (namespace, pod, owner_name) (kube_pod_owner{{{owner_filter}, owner_kind="ReplicaSet"{replicaset_name}}}), "owner_name", "$1", "owner_name", "^(.*)-[a-z0-9]+$") or max by (namespace, pod, owner_name) (kube_pod_owner{{{owner_filter}, owner_kind=~"StatefulSet|DaemonSet"{owner_name}}}))"#
    )
}

/// Start, end and step of a range query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl QueryWindow {
    /// Window of `history` ending at `end`, stepped to roughly `target_points` samples
    pub fn ending_at(end: DateTime<Utc>, history: Duration, target_points: u32) -> Self {
        let lookback = chrono::Duration::from_std(history).unwrap_or_else(|_| chrono::Duration::days(7));
        Self {
            start: end - lookback,
            end,
            step: step_for(history, target_points),
        }
    }

    pub fn ending_now(history: Duration, target_points: u32) -> Self {
        Self::ending_at(Utc::now(), history, target_points)
    }

    /// Step formatted for the Prometheus API
    pub fn step_param(&self) -> String {
        format!("{}s", self.step.as_secs())
    }

    pub fn start_param(&self) -> String {
        self.start.timestamp().to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.timestamp().to_string()
    }
}

/// Step size keeping the sample count near `target_points`, floored at one minute
pub fn step_for(history: Duration, target_points: u32) -> Duration {
    let step = history / target_points.max(1);
    step.max(MIN_STEP)
}

/// Strip an orchestrator-generated suffix from a pod name
///
/// A final hyphen-separated segment of 5 to 10 alphanumeric characters is
/// treated as a hash, so `web-7d4b9c8f6-x2k4z` becomes `web-7d4b9c8f6` and the
/// prefix query also matches earlier pods of the same ReplicaSet. Short names
/// and ordinal suffixes (`postgres-0`) are kept.
pub fn strip_generated_suffix(pod: &str) -> &str {
    if pod.len() <= 10 {
        return pod;
    }
    match pod.rsplit_once('-') {
        Some((prefix, suffix))
            if !prefix.is_empty()
                && (5..=10).contains(&suffix.len())
                && suffix.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            prefix
        }
        _ => pod,
    }
}

/// Namespace matcher for the bulk query; all namespaces when empty
pub fn namespace_matcher(namespaces: &[String]) -> String {
    if namespaces.is_empty() {
        r#"namespace=~".+""#.to_string()
    } else {
        format!(r#"namespace=~"{}""#, namespaces.join("|"))
    }
}

/// Peak working set of a container across all pods sharing the instance prefix
pub fn instance_query(namespace: &str, pod: &str, container: &str) -> String {
    let prefix = strip_generated_suffix(pod);
    let selector = WORKING_SET_SELECTOR.trim_end_matches('}');
    format!(
        r#"max({selector}, namespace="{namespace}", pod=~"{prefix}.*", container="{container}"}})"#
    )
}

/// Working set of a container joined to its owning workload
pub fn workload_query(namespace: &str, workload: &str, container: &str) -> String {
    let selector = WORKING_SET_SELECTOR.trim_end_matches('}');
    let join = owner_join(&format!(r#"namespace="{namespace}""#), Some(workload));
    format!(
        r#"max({selector}, namespace="{namespace}", container="{container}", container!=""}} {join})"#
    )
}

/// One aggregate query grouped by namespace, workload and container
pub fn bulk_query(namespaces: &[String]) -> String {
    let matcher = namespace_matcher(namespaces);
    let selector = WORKING_SET_SELECTOR.trim_end_matches('}');
    let join = owner_join(&matcher, None);
    format!(
        r#"max by (namespace, owner_name, container) ({selector}, {matcher}, container!=""}} {join})"#
    )
}
