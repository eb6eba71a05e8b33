use std::fmt;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::config::RecommenderConfig;

/// The workload a recommendation is produced for.
///
/// Immutable after creation; every log line of the core carries it for
/// correlation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkloadIdentity {
    pub project: String,
    pub location: String,
    pub cluster: String,
    pub namespace: String,
    pub controller_name: String,
    /// Only `Deployment` controllers are scaled horizontally today.
    #[serde(default = "default_controller_type")]
    pub controller_type: String,
    pub container_name: String,
}

fn default_controller_type() -> String {
    "Deployment".to_string()
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.project,
            self.location,
            self.cluster,
            self.namespace,
            self.controller_name,
            self.container_name
        )
    }
}

/// The three additive components of end-to-end scaling reaction time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct StartupBudget {
    /// Pod scheduled-to-ready time; replaced by the startup probe when
    /// lifecycle data is available.
    pub scheduled_to_ready_seconds: f64,
    pub hpa_processing_seconds: f64,
    pub cluster_autoscaler_seconds: f64,
}

impl StartupBudget {
    pub fn from_config(config: &RecommenderConfig) -> Self {
        StartupBudget {
            scheduled_to_ready_seconds: config.default_pod_startup_seconds,
            hpa_processing_seconds: config.default_hpa_processing_seconds,
            cluster_autoscaler_seconds: config.default_cluster_autoscaler_startup_seconds,
        }
    }

    pub fn total_seconds(&self) -> f64 {
        self.scheduled_to_ready_seconds
            + self.hpa_processing_seconds
            + self.cluster_autoscaler_seconds
    }

    /// Number of trace rows one scaling reaction spans.
    pub fn latency_rows(&self, window_seconds: i64) -> Result<usize> {
        ensure!(
            window_seconds > 0,
            "distance_between_points_seconds must be greater than 0"
        );
        Ok((self.total_seconds() / window_seconds as f64).ceil() as usize)
    }
}
