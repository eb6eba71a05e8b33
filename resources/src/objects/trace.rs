use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::utils::{mean, nan_max, quantile};

/// One uniform usage window of the analyzed workload.
///
/// CPU values are cores, memory values MiB (collectors convert from bytes
/// before rows reach the core). Required usage columns are enforced at the
/// deserialization boundary; request columns and the derived sums default
/// to zero and are recomputed by [`WorkloadTrace::normalize`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TraceRow {
    pub window_begin: NaiveDateTime,
    pub num_replicas_at_usage_window: u32,
    pub avg_container_cpu_usage: f64,
    #[serde(default)]
    pub stddev_containers_cpu_usage: f64,
    /// Latest observed per-replica CPU request, constant across rows.
    #[serde(default)]
    pub avg_container_cpu_request: f64,
    pub avg_container_mem_usage_mi: f64,
    pub max_containers_mem_usage_mi: f64,
    /// Latest observed per-replica memory request, constant across rows.
    #[serde(default)]
    pub avg_container_mem_request_mi: f64,

    #[serde(default)]
    pub sum_containers_cpu_request: f64,
    #[serde(default)]
    pub sum_containers_cpu_usage: f64,
    #[serde(default)]
    pub sum_containers_mem_request_mi: f64,
    #[serde(default)]
    pub sum_containers_mem_usage_mi: f64,
}

/// The canonical usage trace: rows ascending by `window_begin`, cleaned
/// values, derived sums in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkloadTrace {
    rows: Vec<TraceRow>,
}

impl WorkloadTrace {
    /// Build the canonical trace from raw per-window rows.
    ///
    /// Sorts ascending by timestamp, zeroes non-finite stddev and missing
    /// request values, and derives the `sum_*` columns. Normalizing an
    /// already-normalized trace is a no-op.
    pub fn normalize(mut rows: Vec<TraceRow>) -> Self {
        rows.sort_by_key(|row| row.window_begin);
        for row in &mut rows {
            let replicas = row.num_replicas_at_usage_window as f64;
            if !row.stddev_containers_cpu_usage.is_finite() {
                row.stddev_containers_cpu_usage = 0.0;
            }
            if !row.avg_container_cpu_request.is_finite() {
                row.avg_container_cpu_request = 0.0;
            }
            if !row.avg_container_mem_request_mi.is_finite() {
                row.avg_container_mem_request_mi = 0.0;
            }
            row.sum_containers_cpu_request = row.avg_container_cpu_request * replicas;
            row.sum_containers_cpu_usage = row.avg_container_cpu_usage * replicas;
            row.sum_containers_mem_request_mi = row.avg_container_mem_request_mi * replicas;
            // Worst-case memory per pod is what the node must hold.
            row.sum_containers_mem_usage_mi = row.max_containers_mem_usage_mi * replicas;
        }
        WorkloadTrace { rows }
    }

    pub fn rows(&self) -> &[TraceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Maximum of a column, NaN rows skipped.
    pub fn max_of(&self, column: impl Fn(&TraceRow) -> f64) -> f64 {
        nan_max(self.rows.iter().map(column))
    }

    /// Mean of a column.
    pub fn mean_of(&self, column: impl Fn(&TraceRow) -> f64) -> f64 {
        mean(self.rows.iter().map(column))
    }

    /// Interpolated quantile of a column, `q` in `[0, 1]`.
    pub fn quantile_of(&self, column: impl Fn(&TraceRow) -> f64, q: f64) -> f64 {
        let values: Vec<f64> = self.rows.iter().map(column).collect();
        quantile(&values, q)
    }

    pub fn first_window(&self) -> Option<NaiveDateTime> {
        self.rows.first().map(|row| row.window_begin)
    }

    pub fn last_window(&self) -> Option<NaiveDateTime> {
        self.rows.last().map(|row| row.window_begin)
    }
}
