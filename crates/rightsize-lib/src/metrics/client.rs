//! Prometheus range-query client
//!
//! Talks to Prometheus either directly over HTTP or through the Kubernetes
//! API server's service proxy, which is how the client reaches an in-cluster
//! Prometheus from a workstation without a port-forward.

use super::query::{self, QueryWindow, BULK_TARGET_POINTS, INSTANCE_TARGET_POINTS};
use super::MetricsSource;
use crate::error::MetricsError;
use crate::models::{BulkSeries, MetricPoint};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment switch that logs every PromQL query before it is sent
pub const DEBUG_QUERIES_ENV: &str = "RIGHTSIZE_DEBUG_QUERIES";

const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

/// How requests reach Prometheus
enum Transport {
    Direct {
        http: reqwest::Client,
        base_url: String,
    },
    ApiProxy {
        client: kube::Client,
        base_path: String,
    },
}

/// Prometheus client implementing [`MetricsSource`]
pub struct PrometheusClient {
    transport: Transport,
    timeout: Duration,
    debug_queries: bool,
}

impl PrometheusClient {
    /// Client for a directly reachable Prometheus base URL
    pub fn new(url: &str, timeout: Duration) -> Result<Self, MetricsError> {
        let base_url = url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(MetricsError::InvalidUrl(format!(
                "{url}: URL must start with http:// or https://"
            )));
        }
        url::Url::parse(&base_url).map_err(|e| MetricsError::InvalidUrl(format!("{url}: {e}")))?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            transport: Transport::Direct { http, base_url },
            timeout,
            debug_queries: debug_queries_enabled(),
        })
    }

    /// Client that reaches a Prometheus service through the API server proxy
    pub fn via_api_proxy(
        client: kube::Client,
        namespace: &str,
        service: &str,
        port: i32,
        timeout: Duration,
    ) -> Self {
        Self {
            transport: Transport::ApiProxy {
                client,
                base_path: format!("/api/v1/namespaces/{namespace}/services/{service}:{port}/proxy"),
            },
            timeout,
            debug_queries: debug_queries_enabled(),
        }
    }

    /// Human-readable endpoint for logs
    pub fn endpoint(&self) -> &str {
        match &self.transport {
            Transport::Direct { base_url, .. } => base_url,
            Transport::ApiProxy { base_path, .. } => base_path,
        }
    }

    /// Run a range query and return the matrix series
    async fn query_range(&self, promql: &str, window: QueryWindow) -> Result<Vec<PromSeries>, MetricsError> {
        if self.debug_queries {
            debug!(query = %promql, step = %window.step_param(), "Prometheus query");
        }

        let body = tokio::time::timeout(self.timeout, self.fetch(promql, &window))
            .await
            .map_err(|_| MetricsError::Timeout(self.timeout))??;

        parse_matrix(promql, &body)
    }

    async fn fetch(&self, promql: &str, window: &QueryWindow) -> Result<String, MetricsError> {
        let params = [
            ("query", promql.to_string()),
            ("start", window.start_param()),
            ("end", window.end_param()),
            ("step", window.step_param()),
        ];

        match &self.transport {
            Transport::Direct { http, base_url } => {
                let response = http
                    .get(format!("{base_url}{QUERY_RANGE_PATH}"))
                    .query(&params)
                    .send()
                    .await?;

                let status = response.status();
                let body = response.text().await?;

                if status.is_success() {
                    return Ok(body);
                }

                // Bad queries come back as 4xx with a JSON error envelope
                match serde_json::from_str::<PromResponse>(&body) {
                    Ok(envelope) if envelope.status == "error" => Err(MetricsError::Query {
                        query: promql.to_string(),
                        message: envelope.error_message(),
                    }),
                    _ => Err(MetricsError::Status {
                        status: status.as_u16(),
                        body,
                    }),
                }
            }
            Transport::ApiProxy { client, base_path } => {
                let query_string = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
                    .finish();

                let request = http::Request::builder()
                    .method("GET")
                    .uri(format!("{base_path}{QUERY_RANGE_PATH}?{query_string}"))
                    .body(Vec::new())
                    .map_err(|e| MetricsError::InvalidUrl(format!("failed to build proxy request: {e}")))?;

                Ok(client.request_text(request).await?)
            }
        }
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn query_by_instance(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        history: Duration,
    ) -> Result<Vec<MetricPoint>, MetricsError> {
        let promql = query::instance_query(namespace, instance, container);
        let series = self
            .query_range(&promql, QueryWindow::ending_now(history, INSTANCE_TARGET_POINTS))
            .await?;
        Ok(flatten(series))
    }

    async fn query_by_workload(
        &self,
        namespace: &str,
        workload: &str,
        container: &str,
        history: Duration,
    ) -> Result<Vec<MetricPoint>, MetricsError> {
        let promql = query::workload_query(namespace, workload, container);
        let series = self
            .query_range(&promql, QueryWindow::ending_now(history, INSTANCE_TARGET_POINTS))
            .await?;
        Ok(flatten(series))
    }

    async fn bulk_query(&self, namespaces: &[String], history: Duration) -> Result<BulkSeries, MetricsError> {
        let promql = query::bulk_query(namespaces);
        let series = self
            .query_range(&promql, QueryWindow::ending_now(history, BULK_TARGET_POINTS))
            .await?;
        Ok(group_by_workload(series))
    }
}

fn debug_queries_enabled() -> bool {
    std::env::var(DEBUG_QUERIES_ENV)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Prometheus API response envelope
#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

impl PromResponse {
    fn error_message(&self) -> String {
        match (&self.error_type, &self.error) {
            (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
            (None, Some(msg)) => msg.clone(),
            (Some(kind), None) => kind.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<PromSeries>,
}

#[derive(Debug, Deserialize)]
struct PromSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PromSeries {
    /// Finite samples only; Prometheus encodes gaps as "NaN"
    fn points(&self) -> Vec<MetricPoint> {
        self.values
            .iter()
            .filter_map(|(ts, raw)| {
                let value: f64 = raw.parse().ok()?;
                if !value.is_finite() {
                    return None;
                }
                let secs = ts.trunc() as i64;
                let nanos = (ts.fract() * 1e9).round() as u32;
                let timestamp = Utc.timestamp_opt(secs, nanos.min(999_999_999)).single()?;
                Some(MetricPoint { timestamp, value })
            })
            .collect()
    }
}

fn parse_matrix(promql: &str, body: &str) -> Result<Vec<PromSeries>, MetricsError> {
    let response: PromResponse =
        serde_json::from_str(body).map_err(|e| MetricsError::Parse(e.to_string()))?;

    for warning in &response.warnings {
        warn!(query = %promql, warning = %warning, "Prometheus returned a warning");
    }

    if response.status != "success" {
        return Err(MetricsError::Query {
            query: promql.to_string(),
            message: response.error_message(),
        });
    }

    let data = response
        .data
        .ok_or_else(|| MetricsError::Parse("response has no data".to_string()))?;

    if data.result_type != "matrix" {
        return Err(MetricsError::Parse(format!(
            "expected matrix result, got {}",
            data.result_type
        )));
    }

    Ok(data.result)
}

/// Merge every returned series into one time-ordered sample list
fn flatten(series: Vec<PromSeries>) -> Vec<MetricPoint> {
    let mut points: Vec<MetricPoint> = series.iter().flat_map(PromSeries::points).collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

/// Index bulk results as `namespace/workload -> container -> samples`
fn group_by_workload(series: Vec<PromSeries>) -> BulkSeries {
    let mut grouped = BulkSeries::new();

    for s in series {
        let (Some(namespace), Some(owner), Some(container)) = (
            s.metric.get("namespace"),
            s.metric.get("owner_name"),
            s.metric.get("container"),
        ) else {
            debug!(labels = ?s.metric, "Skipping bulk series without workload labels");
            continue;
        };

        grouped
            .entry(format!("{namespace}/{owner}"))
            .or_default()
            .entry(container.clone())
            .or_default()
            .extend(s.points());
    }

    grouped
}
