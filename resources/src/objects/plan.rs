use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::workload::{StartupBudget, WorkloadIdentity};

/// One candidate autoscaling configuration.
///
/// The generator fixes the CPU request and the replica range at birth, the
/// validator fills in target utilization, CPU limit and slope, and the
/// simulator treats the plan as read-only.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkloadPlan {
    /// Generating algorithm: `DCR-<percentile>`, `DMR_mean-loop_<min>`
    /// or `VPA`.
    pub method: String,
    /// Per-replica CPU request in cores.
    pub recommended_cpu_request: f64,
    /// Per-replica CPU limit; zero means unbounded (not yet sized).
    pub recommended_cpu_limit_or_unbounded: f64,
    /// Per-replica memory request and limit in MiB.
    pub recommended_mem_request_and_limits_mi: f64,
    pub recommended_min_replicas: u32,
    pub recommended_max_replicas: u32,
    /// Target CPU utilization for the HPA, as a fraction.
    pub recommended_hpa_target_cpu: f64,
    /// Largest ratio of near-future usage to current usage observed at or
    /// above this plan's CPU baseline.
    pub max_usage_slope_up_ratio: f64,
    /// Scaling reaction time expressed in trace rows.
    pub workload_e2e_startup_latency_rows: usize,
}

impl WorkloadPlan {
    pub fn new(
        method: String,
        cpu_request: f64,
        mem_request_mi: f64,
        min_replicas: u32,
        max_replicas: u32,
    ) -> Self {
        WorkloadPlan {
            method,
            recommended_cpu_request: cpu_request,
            recommended_cpu_limit_or_unbounded: 0.0,
            recommended_mem_request_and_limits_mi: mem_request_mi,
            recommended_min_replicas: min_replicas,
            recommended_max_replicas: max_replicas,
            recommended_hpa_target_cpu: 0.0,
            max_usage_slope_up_ratio: 0.0,
            workload_e2e_startup_latency_rows: 0,
        }
    }

    /// Identity used to drop duplicate candidates: CPU request at
    /// millicore resolution, memory at whole MiB, plus the replica range.
    pub fn dedup_key(&self) -> (u64, u64, u32, u32) {
        (
            (self.recommended_cpu_request * 1000.0).round() as u64,
            self.recommended_mem_request_and_limits_mi.round() as u64,
            self.recommended_min_replicas,
            self.recommended_max_replicas,
        )
    }

    /// Deterministic presentation order: method, CPU, memory, max replicas.
    pub fn presentation_order(&self, other: &Self) -> Ordering {
        self.method
            .cmp(&other.method)
            .then_with(|| {
                self.recommended_cpu_request
                    .partial_cmp(&other.recommended_cpu_request)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| {
                self.recommended_mem_request_and_limits_mi
                    .partial_cmp(&other.recommended_mem_request_and_limits_mi)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| self.recommended_max_replicas.cmp(&other.recommended_max_replicas))
    }
}

/// A plan bound to a workload, carrying simulation verdict and savings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkloadRecommendation {
    pub identity: WorkloadIdentity,
    pub startup_budget: StartupBudget,
    pub plan: WorkloadPlan,
    pub analysis_period_start: Option<NaiveDateTime>,
    pub analysis_period_end: Option<NaiveDateTime>,
    /// Replica extremes actually observed over the analysis window.
    pub observed_min_replicas: u32,
    pub observed_max_replicas: u32,
    /// Peak ratio of actual usage to forecast capacity seen in simulation.
    pub scale_up_behaviour_to_x_times: f64,
    pub valid: bool,
    pub validation_msg: String,
    pub forecast_cpu_saving: f64,
    pub forecast_mem_saving_mi: f64,
}

impl WorkloadRecommendation {
    pub fn new(
        identity: WorkloadIdentity,
        startup_budget: StartupBudget,
        plan: WorkloadPlan,
    ) -> Self {
        WorkloadRecommendation {
            identity,
            startup_budget,
            plan,
            analysis_period_start: None,
            analysis_period_end: None,
            observed_min_replicas: 0,
            observed_max_replicas: 0,
            scale_up_behaviour_to_x_times: 0.0,
            valid: false,
            validation_msg: String::new(),
            forecast_cpu_saving: 0.0,
            forecast_mem_saving_mi: 0.0,
        }
    }
}
