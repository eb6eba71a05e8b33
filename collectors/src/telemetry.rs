use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use resources::{
    config::RecommenderConfig,
    objects::{TraceRow, WorkloadIdentity, WorkloadTrace},
    utils::{mean, nan_max, sample_stddev},
};

use crate::USER_AGENT;

const BYTES_PER_MI: f64 = 1024.0 * 1024.0;
const FETCH_ATTEMPTS: u32 = 3;

/// One monitoring time-series query.
#[derive(Debug, Clone)]
pub struct MetricRequest {
    pub metric: &'static str,
    pub per_series_aligner: &'static str,
    pub cross_series_reducer: &'static str,
    /// Take only the most recent point (request metrics).
    pub latest_value: bool,
}

/// Required usage metrics; a workload without them reports no data.
fn required_metrics() -> [MetricRequest; 2] {
    [
        MetricRequest {
            metric: "kubernetes.io/container/memory/used_bytes",
            per_series_aligner: "ALIGN_MAX",
            cross_series_reducer: "REDUCE_MAX",
            latest_value: false,
        },
        MetricRequest {
            metric: "kubernetes.io/container/cpu/core_usage_time",
            per_series_aligner: "ALIGN_RATE",
            cross_series_reducer: "REDUCE_MEAN",
            latest_value: false,
        },
    ]
}

/// Optional request metrics; missing data degrades to a zero request.
fn request_metrics() -> [MetricRequest; 2] {
    [
        MetricRequest {
            metric: "kubernetes.io/container/cpu/request_cores",
            per_series_aligner: "ALIGN_MEAN",
            cross_series_reducer: "REDUCE_MEAN",
            latest_value: true,
        },
        MetricRequest {
            metric: "kubernetes.io/container/memory/request_bytes",
            per_series_aligner: "ALIGN_MEAN",
            cross_series_reducer: "REDUCE_MEAN",
            latest_value: true,
        },
    ]
}

/// One aligned sample of one pod's series.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SeriesPoint {
    pub window_begin: NaiveDateTime,
    pub container: String,
    pub pod: String,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    resource: MonitoredResource,
    #[serde(default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct MonitoredResource {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Point {
    interval: TimeInterval,
    value: TypedValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeInterval {
    start_time: DateTime<Utc>,
}

/// Monitoring encodes integers as strings; both shapes map to `f64`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TypedValue {
    double_value: Option<f64>,
    int64_value: Option<String>,
}

impl TypedValue {
    fn as_f64(&self) -> f64 {
        if let Some(v) = self.double_value {
            return v;
        }
        self.int64_value
            .as_deref()
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

/// Fetches aggregated per-window usage series for one workload.
pub struct TelemetryClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelemetryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch, aggregate and normalize the workload trace for the window.
    ///
    /// An empty trace (rather than an error) is returned when either
    /// required metric reports no data.
    pub async fn fetch_workload_trace(
        &self,
        config: &RecommenderConfig,
        identity: &WorkloadIdentity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WorkloadTrace> {
        tracing::info!("Getting aggregated time-series data for workload {}", identity);

        let [mem_metric, cpu_metric] = required_metrics();
        let mem_points = self
            .fetch_series(config, &mem_metric, identity, start, end)
            .await?;
        let cpu_points = self
            .fetch_series(config, &cpu_metric, identity, start, end)
            .await?;
        if mem_points.is_empty() || cpu_points.is_empty() {
            tracing::warn!(
                "Required metrics missing for workload {}; it likely does not exist or is not reporting data",
                identity
            );
            return Ok(WorkloadTrace::default());
        }

        let [cpu_req_metric, mem_req_metric] = request_metrics();
        let latest_cpu_request =
            latest_value(&self.fetch_series(config, &cpu_req_metric, identity, start, end).await?);
        let latest_mem_request_bytes =
            latest_value(&self.fetch_series(config, &mem_req_metric, identity, start, end).await?);
        tracing::info!(
            "CPU request cores: {}, memory request bytes: {}",
            latest_cpu_request,
            latest_mem_request_bytes
        );

        let rows = aggregate_points(
            &cpu_points,
            &mem_points,
            latest_cpu_request,
            latest_mem_request_bytes,
        );
        Ok(WorkloadTrace::normalize(rows))
    }

    /// Paginated list call with bounded retry on transient failures.
    async fn fetch_series(
        &self,
        config: &RecommenderConfig,
        request: &MetricRequest,
        identity: &WorkloadIdentity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>> {
        tracing::info!("Fetching time-series metric {}", request.metric);
        let url = format!(
            "{}/v3/projects/{}/timeSeries",
            self.base_url, identity.project
        );
        let filter = build_workload_filter(config, request, identity);
        let alignment = format!("{}s", config.distance_between_points_seconds);

        let mut points = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("aggregation.alignmentPeriod", alignment.clone()),
                (
                    "aggregation.crossSeriesReducer",
                    request.cross_series_reducer.to_string(),
                ),
                (
                    "aggregation.perSeriesAligner",
                    request.per_series_aligner.to_string(),
                ),
                (
                    "aggregation.groupByFields",
                    "resource.labels.container_name".to_string(),
                ),
                (
                    "aggregation.groupByFields",
                    "resource.labels.pod_name".to_string(),
                ),
                ("filter", filter.clone()),
                ("interval.startTime", start.to_rfc3339()),
                ("interval.endTime", end.to_rfc3339()),
                ("view", "FULL".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self.get_with_retry(&url, &query).await?;
            for series in response.time_series {
                let container = series
                    .resource
                    .labels
                    .get("container_name")
                    .cloned()
                    .unwrap_or_default();
                let pod = series
                    .resource
                    .labels
                    .get("pod_name")
                    .cloned()
                    .unwrap_or_default();
                for point in series.points {
                    points.push(SeriesPoint {
                        window_begin: point.interval.start_time.naive_utc(),
                        container: container.clone(),
                        pod: pod.clone(),
                        value: point.value.as_f64(),
                    });
                }
            }

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(points)
    }

    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<ListTimeSeriesResponse> {
        let mut last_error = anyhow!("no attempt made");
        for attempt in 1..=FETCH_ATTEMPTS {
            let result = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .query(query)
                .send()
                .await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<ListTimeSeriesResponse>()
                            .await
                            .with_context(|| format!("Malformed time-series response from {}", url));
                    }
                    if !is_transient(status) {
                        return Err(anyhow!("Time-series request to {} failed: {}", url, status));
                    }
                    last_error = anyhow!("Transient status {} from {}", status, url);
                },
                Err(err) => last_error = anyhow!(err),
            }
            tracing::warn!("Time-series fetch attempt {} failed: {:#}", attempt, last_error);
            sleep(Duration::from_millis(200 * attempt as u64)).await;
        }
        Err(last_error.context("Time-series fetch exhausted retries"))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn latest_value(points: &[SeriesPoint]) -> f64 {
    match points.iter().max_by_key(|p| p.window_begin) {
        Some(point) => point.value,
        None => {
            tracing::info!("No request data found; defaulting the latest request to 0");
            0.0
        },
    }
}

/// Monitoring filter for one metric of one workload, honoring the
/// excluded-namespace list.
pub(crate) fn build_workload_filter(
    config: &RecommenderConfig,
    request: &MetricRequest,
    identity: &WorkloadIdentity,
) -> String {
    let mut conditions = vec![
        format!("metric.type = \"{}\"", request.metric),
        "resource.type = \"k8s_container\"".to_string(),
    ];
    if request.metric.contains("memory/used_bytes") {
        conditions.push("metric.label.memory_type = \"non-evictable\"".to_string());
    }

    let mut add = |label: &str, value: &str| {
        if !value.trim().is_empty() {
            conditions.push(format!("{} = \"{}\"", label, value));
        }
    };
    add("resource.labels.project_id", &identity.project);
    add("resource.labels.location", &identity.location);
    add("resource.labels.cluster_name", &identity.cluster);
    add("resource.labels.namespace_name", &identity.namespace);
    add(
        "metadata.system_labels.top_level_controller_name",
        &identity.controller_name,
    );
    add(
        "metadata.system_labels.top_level_controller_type",
        &identity.controller_type,
    );
    add("resource.labels.container_name", &identity.container_name);

    for namespace in &config.excluded_namespaces {
        conditions.push(format!(
            "NOT resource.labels.namespace_name = \"{}\"",
            namespace
        ));
    }
    conditions.join(" AND ")
}

/// Collapse per-pod samples into per-window trace rows.
///
/// CPU series contribute the mean, spread and replica count (one series
/// per reporting pod); memory series contribute worst-case and mean
/// usage. Only windows covered by both metrics survive. Memory converts
/// from bytes to MiB here, before the rows reach the core.
pub(crate) fn aggregate_points(
    cpu_points: &[SeriesPoint],
    mem_points: &[SeriesPoint],
    latest_cpu_request: f64,
    latest_mem_request_bytes: f64,
) -> Vec<TraceRow> {
    type Key = (NaiveDateTime, String);
    let mut cpu_by_window: BTreeMap<Key, Vec<f64>> = BTreeMap::new();
    for point in cpu_points {
        cpu_by_window
            .entry((point.window_begin, point.container.clone()))
            .or_default()
            .push(point.value);
    }
    let mut mem_by_window: BTreeMap<Key, Vec<f64>> = BTreeMap::new();
    for point in mem_points {
        mem_by_window
            .entry((point.window_begin, point.container.clone()))
            .or_default()
            .push(point.value);
    }

    let mut rows = Vec::new();
    for (key, cpu_values) in &cpu_by_window {
        let mem_values = match mem_by_window.get(key) {
            Some(values) => values,
            None => continue,
        };
        rows.push(TraceRow {
            window_begin: key.0,
            num_replicas_at_usage_window: cpu_values.len() as u32,
            avg_container_cpu_usage: mean(cpu_values.iter().copied()),
            stddev_containers_cpu_usage: sample_stddev(cpu_values),
            avg_container_cpu_request: latest_cpu_request,
            avg_container_mem_usage_mi: mean(mem_values.iter().copied()) / BYTES_PER_MI,
            max_containers_mem_usage_mi: nan_max(mem_values.iter().copied()) / BYTES_PER_MI,
            avg_container_mem_request_mi: latest_mem_request_bytes / BYTES_PER_MI,
            sum_containers_cpu_request: 0.0,
            sum_containers_cpu_usage: 0.0,
            sum_containers_mem_request_mi: 0.0,
            sum_containers_mem_usage_mi: 0.0,
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn window(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    fn point(minute: u32, pod: &str, value: f64) -> SeriesPoint {
        SeriesPoint {
            window_begin: window(minute),
            container: "app".to_string(),
            pod: pod.to_string(),
            value,
        }
    }

    #[test]
    fn filter_carries_identity_and_exclusions() {
        let config = RecommenderConfig::default();
        let identity = WorkloadIdentity {
            project: "proj".to_string(),
            location: "loc".to_string(),
            cluster: "cl".to_string(),
            namespace: "ns".to_string(),
            controller_name: "web".to_string(),
            controller_type: "Deployment".to_string(),
            container_name: "app".to_string(),
        };
        let [mem, cpu] = required_metrics();

        let filter = build_workload_filter(&config, &mem, &identity);
        assert!(filter.contains("metric.label.memory_type = \"non-evictable\""));
        assert!(filter.contains("resource.labels.project_id = \"proj\""));
        assert!(filter.contains("NOT resource.labels.namespace_name = \"kube-system\""));

        let filter = build_workload_filter(&config, &cpu, &identity);
        assert!(!filter.contains("memory_type"));
        assert!(filter.contains("metadata.system_labels.top_level_controller_type = \"Deployment\""));
    }

    #[test]
    fn blank_identity_fields_are_left_out_of_the_filter() {
        let config = RecommenderConfig::default();
        let identity = WorkloadIdentity {
            project: "proj".to_string(),
            location: String::new(),
            cluster: "cl".to_string(),
            namespace: "ns".to_string(),
            controller_name: "web".to_string(),
            controller_type: "Deployment".to_string(),
            container_name: "app".to_string(),
        };
        let [_, cpu] = required_metrics();
        let filter = build_workload_filter(&config, &cpu, &identity);
        assert!(!filter.contains("resource.labels.location"));
    }

    #[test]
    fn aggregation_counts_replicas_and_converts_memory() {
        // Two pods report CPU in the first window, one in the second.
        let cpu = vec![
            point(0, "pod-a", 0.2),
            point(0, "pod-b", 0.4),
            point(1, "pod-a", 0.3),
        ];
        let mem = vec![
            point(0, "pod-a", 100.0 * BYTES_PER_MI),
            point(0, "pod-b", 300.0 * BYTES_PER_MI),
            point(1, "pod-a", 200.0 * BYTES_PER_MI),
        ];
        let rows = aggregate_points(&cpu, &mem, 0.5, 256.0 * BYTES_PER_MI);

        assert_eq!(rows.len(), 2);
        let first = &rows[0];
        assert_eq!(first.num_replicas_at_usage_window, 2);
        assert!((first.avg_container_cpu_usage - 0.3).abs() < 1e-12);
        assert!(first.stddev_containers_cpu_usage > 0.0);
        assert!((first.avg_container_mem_usage_mi - 200.0).abs() < 1e-9);
        assert!((first.max_containers_mem_usage_mi - 300.0).abs() < 1e-9);
        assert!((first.avg_container_mem_request_mi - 256.0).abs() < 1e-9);

        let second = &rows[1];
        assert_eq!(second.num_replicas_at_usage_window, 1);
        assert_eq!(second.stddev_containers_cpu_usage, 0.0);
    }

    #[test]
    fn windows_missing_a_required_metric_are_dropped() {
        let cpu = vec![point(0, "pod-a", 0.2), point(1, "pod-a", 0.3)];
        let mem = vec![point(0, "pod-a", 100.0 * BYTES_PER_MI)];
        let rows = aggregate_points(&cpu, &mem, 0.0, 0.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].window_begin, window(0));
    }

    #[test]
    fn latest_request_value_defaults_to_zero() {
        assert_eq!(latest_value(&[]), 0.0);
        let points = vec![point(0, "pod-a", 0.25), point(5, "pod-a", 0.5)];
        assert_eq!(latest_value(&points), 0.5);
    }
}
