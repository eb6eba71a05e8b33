use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

use resources::objects::{AnalysisSeries, WorkloadRecommendation};

use crate::USER_AGENT;

/// One analyzed window, flattened for the reporting warehouse.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct WarehouseRow {
    pub window_begin: NaiveDateTime,
    pub num_replicas_at_usage_window: u32,
    pub sum_containers_cpu_request: f64,
    pub sum_containers_cpu_usage: f64,
    pub forecast_sum_cpu_up_and_running: f64,
    pub sum_containers_mem_request_mi: f64,
    pub sum_containers_mem_usage_mi: f64,
    pub forecast_sum_mem_up_and_running: f64,
    pub forecast_replicas_up_and_running: u32,

    pub project: String,
    pub location: String,
    pub cluster: String,
    pub namespace: String,
    pub controller_name: String,
    pub container_name: String,
    pub analysis_period_start: Option<NaiveDateTime>,
    pub analysis_period_end: Option<NaiveDateTime>,

    pub recommended_cpu_request: f64,
    pub recommended_mem_request_and_limits_mi: f64,
    pub recommended_cpu_limit_or_unbounded: f64,
    pub recommended_min_replicas: u32,
    pub recommended_max_replicas: u32,
    pub recommended_hpa_target_cpu: f64,
    pub max_usage_slope_up_ratio: f64,
    pub workload_e2e_startup_latency_rows: usize,

    pub forecast_cpu_saving: f64,
    pub forecast_mem_saving_mi: f64,
    pub method: String,
}

/// Flatten a winning analysis into one warehouse row per window.
pub fn build_rows(series: &AnalysisSeries, rec: &WorkloadRecommendation) -> Vec<WarehouseRow> {
    (0..series.len())
        .map(|i| WarehouseRow {
            window_begin: series.window_begin[i],
            num_replicas_at_usage_window: series.num_replicas_at_usage_window[i],
            sum_containers_cpu_request: series.sum_containers_cpu_request[i],
            sum_containers_cpu_usage: series.sum_containers_cpu_usage[i],
            forecast_sum_cpu_up_and_running: series.forecast_sum_cpu_up_and_running[i],
            sum_containers_mem_request_mi: series.sum_containers_mem_request_mi[i],
            sum_containers_mem_usage_mi: series.sum_containers_mem_usage_mi[i],
            forecast_sum_mem_up_and_running: series.forecast_sum_mem_up_and_running[i],
            forecast_replicas_up_and_running: series.forecast_replicas_up_and_running[i],

            project: rec.identity.project.clone(),
            location: rec.identity.location.clone(),
            cluster: rec.identity.cluster.clone(),
            namespace: rec.identity.namespace.clone(),
            controller_name: rec.identity.controller_name.clone(),
            container_name: rec.identity.container_name.clone(),
            analysis_period_start: rec.analysis_period_start,
            analysis_period_end: rec.analysis_period_end,

            recommended_cpu_request: rec.plan.recommended_cpu_request,
            recommended_mem_request_and_limits_mi: rec.plan.recommended_mem_request_and_limits_mi,
            recommended_cpu_limit_or_unbounded: rec.plan.recommended_cpu_limit_or_unbounded,
            recommended_min_replicas: rec.plan.recommended_min_replicas,
            recommended_max_replicas: rec.plan.recommended_max_replicas,
            recommended_hpa_target_cpu: rec.plan.recommended_hpa_target_cpu,
            max_usage_slope_up_ratio: rec.plan.max_usage_slope_up_ratio,
            workload_e2e_startup_latency_rows: rec.plan.workload_e2e_startup_latency_rows,

            forecast_cpu_saving: rec.forecast_cpu_saving,
            forecast_mem_saving_mi: rec.forecast_mem_saving_mi,
            method: rec.plan.method.clone(),
        })
        .collect()
}

/// Append-only writer for the reporting warehouse.
pub struct WarehouseSink {
    client: reqwest::Client,
    endpoint: String,
}

impl WarehouseSink {
    /// `endpoint` is the full append URL of the destination table.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Append one row per analyzed window; returns the row count.
    pub async fn append(
        &self,
        series: &AnalysisSeries,
        rec: &WorkloadRecommendation,
    ) -> Result<usize> {
        if series.is_empty() {
            tracing::info!("No data to write to the warehouse");
            return Ok(0);
        }
        let rows = build_rows(series, rec);
        self.client
            .post(&self.endpoint)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&rows)
            .send()
            .await
            .with_context(|| format!("Failed to reach warehouse at {}", self.endpoint))?
            .error_for_status()
            .context("Warehouse rejected the append")?;
        tracing::info!(
            "Successfully wrote {} records to the warehouse at {}",
            rows.len(),
            self.endpoint
        );
        Ok(rows.len())
    }
}
