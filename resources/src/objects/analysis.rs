use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::trace::WorkloadTrace;
use crate::utils::mean;

/// Per-window simulation output for one plan, column-oriented.
///
/// The observed columns are copied from the trace so a series is
/// self-contained for scoring, display and the warehouse sink. Forecast
/// columns are filled by the simulator, savings columns by the scorer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AnalysisSeries {
    pub method: String,

    pub window_begin: Vec<NaiveDateTime>,
    pub num_replicas_at_usage_window: Vec<u32>,
    pub sum_containers_cpu_request: Vec<f64>,
    pub sum_containers_cpu_usage: Vec<f64>,
    pub sum_containers_mem_request_mi: Vec<f64>,
    pub sum_containers_mem_usage_mi: Vec<f64>,

    pub forecast_replicas_up_and_running: Vec<u32>,
    pub forecast_sum_cpu_up_and_running: Vec<f64>,
    pub forecast_sum_mem_up_and_running: Vec<f64>,
    pub forecast_replicas_desired: Vec<u32>,
    /// Observed-usage-to-forecast-capacity ratio the simulated HPA reacts to.
    pub scale_up_behaviour_to_x_times: Vec<f64>,

    pub forecast_cpu_saving: Vec<f64>,
    pub forecast_mem_saving_mi: Vec<f64>,
    pub avg_saving_in_cpus: Vec<f64>,
    pub avg_saving_in_cpus_1d_mean: Vec<f64>,
    pub forecast_clash: Vec<bool>,
}

impl AnalysisSeries {
    /// Seed a series with the observed columns of `trace`; forecast and
    /// savings columns start empty.
    pub fn from_trace(method: &str, trace: &WorkloadTrace) -> Self {
        let n = trace.len();
        let mut series = AnalysisSeries {
            method: method.to_string(),
            window_begin: Vec::with_capacity(n),
            num_replicas_at_usage_window: Vec::with_capacity(n),
            sum_containers_cpu_request: Vec::with_capacity(n),
            sum_containers_cpu_usage: Vec::with_capacity(n),
            sum_containers_mem_request_mi: Vec::with_capacity(n),
            sum_containers_mem_usage_mi: Vec::with_capacity(n),
            ..AnalysisSeries::default()
        };
        for row in trace.rows() {
            series.window_begin.push(row.window_begin);
            series
                .num_replicas_at_usage_window
                .push(row.num_replicas_at_usage_window);
            series
                .sum_containers_cpu_request
                .push(row.sum_containers_cpu_request);
            series
                .sum_containers_cpu_usage
                .push(row.sum_containers_cpu_usage);
            series
                .sum_containers_mem_request_mi
                .push(row.sum_containers_mem_request_mi);
            series
                .sum_containers_mem_usage_mi
                .push(row.sum_containers_mem_usage_mi);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.window_begin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window_begin.is_empty()
    }

    /// The plan score: mean CPU-equivalent saving per window.
    pub fn score(&self) -> f64 {
        mean(self.avg_saving_in_cpus.iter().copied())
    }
}
