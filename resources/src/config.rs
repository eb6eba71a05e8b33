use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Tunables for plan generation and simulation.
///
/// The value is immutable once built: construct it from [`Default`] (or a
/// config file layered with environment overrides, see `hpactl`) and thread
/// it through every call. Tests parameterize behaviour by building fresh
/// values with struct-update syntax.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RecommenderConfig {
    /// Width of one usage window in seconds. Must be positive.
    pub distance_between_points_seconds: i64,
    /// Fallback pod scheduled-to-ready time when no probe data exists.
    pub default_pod_startup_seconds: f64,
    /// Time the HPA control loop needs to react to a metric change.
    pub default_hpa_processing_seconds: f64,
    /// Time the cluster autoscaler needs to deliver a new node.
    pub default_cluster_autoscaler_startup_seconds: f64,

    /// Largest acceptable usage slope-up ratio for a plan.
    pub hpa_scale_limit: f64,
    /// Safety margin baked into the recommended target utilization.
    pub hpa_target_buffer: f64,
    /// Scale-down stabilization window of the simulator, in rows.
    pub hpa_scale_down_behaviour_steps: usize,
    /// Multiplier on peak total CPU when sizing max replica capacity.
    pub extra_hpa_buffer_for_max_replicas: f64,
    /// Headroom multiplier on the memory recommendation.
    pub extra_hpa_buffer_for_memory_recommendation: f64,
    /// Headroom multiplier applied when CPU is under-provisioned.
    pub extra_hpa_buffer_for_cpu_usage_capacity: f64,
    /// Memory headroom on the static fallback plan.
    pub extra_vpa_buffer_for_memory_recommendation: f64,
    /// CPU headroom on the static fallback plan.
    pub extra_vpa_buffer_for_cpu_usage_capacity: f64,

    /// Floor for any proposed per-replica CPU request, in cores.
    pub min_cpu_core_proposed_value: f64,
    /// Decimal places kept on CPU core values (millicore resolution).
    pub mcpu_rounding: u32,
    /// One GiB of memory costs this many CPUs in the savings score.
    pub cost_of_gb_in_cpus: f64,
    /// Valid range for the recommended target CPU utilization.
    pub min_hpa_target_cpu: f64,
    pub max_hpa_target_cpu: f64,
    /// Usage percentile that must stay below the current request,
    /// otherwise the workload counts as under-provisioned.
    pub underprovisioned_cpu_usage_threshold: f64,

    /// Windows where forecast CPU may fall below actual usage before a
    /// plan is rejected. Memory never gets such an allowance.
    pub cpu_clash_count_threshold: u32,
    /// Floor on the recommended minimum replica count.
    pub min_rec_replicas: u32,
    /// Inclusive percentile sweep for the DCR plan family.
    pub min_dcr_percentile_value: u32,
    pub max_dcr_percentile_value: u32,

    /// Namespaces the telemetry fetcher filters out.
    pub excluded_namespaces: Vec<String>,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        RecommenderConfig {
            distance_between_points_seconds: 60,
            default_pod_startup_seconds: 60.0,
            default_hpa_processing_seconds: 45.0,
            default_cluster_autoscaler_startup_seconds: 75.0,

            hpa_scale_limit: 2.3,
            hpa_target_buffer: 0.10,
            hpa_scale_down_behaviour_steps: 10,
            extra_hpa_buffer_for_max_replicas: 1.00,
            extra_hpa_buffer_for_memory_recommendation: 1.05,
            extra_hpa_buffer_for_cpu_usage_capacity: 1.05,
            extra_vpa_buffer_for_memory_recommendation: 1.05,
            extra_vpa_buffer_for_cpu_usage_capacity: 1.001,

            min_cpu_core_proposed_value: 0.010,
            mcpu_rounding: 3,
            cost_of_gb_in_cpus: 7.5,
            min_hpa_target_cpu: 0.40,
            max_hpa_target_cpu: 1.00,
            underprovisioned_cpu_usage_threshold: 0.9,

            cpu_clash_count_threshold: 0,
            min_rec_replicas: 3,
            min_dcr_percentile_value: 10,
            max_dcr_percentile_value: 100,

            excluded_namespaces: [
                "kube-system",
                "istio-system",
                "gatekeeper-system",
                "gke-system",
                "gmp-system",
                "gke-gmp-system",
                "gke-managed-filestorecsi",
                "gke-mcs",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl RecommenderConfig {
    /// Check the invariants every consumer relies on.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.distance_between_points_seconds > 0,
            "distance_between_points_seconds must be greater than 0"
        );
        ensure!(
            self.min_dcr_percentile_value <= self.max_dcr_percentile_value,
            "DCR percentile range is empty: {} > {}",
            self.min_dcr_percentile_value,
            self.max_dcr_percentile_value
        );
        ensure!(
            self.min_hpa_target_cpu <= self.max_hpa_target_cpu,
            "HPA target CPU range is empty"
        );
        Ok(())
    }
}
