use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use resources::{
    objects::{StartupBudget, WorkloadIdentity},
    utils::quantile,
};

use crate::USER_AGENT;

/// Scheduling-to-readiness record of one pod of the workload.
#[derive(Debug, Clone, PartialEq)]
pub struct PodLifecycle {
    pub name: String,
    pub namespace: String,
    pub has_readiness_probe: bool,
    pub pod_scheduled_time: Option<DateTime<Utc>>,
    pub ready_time: Option<DateTime<Utc>>,
}

impl PodLifecycle {
    /// Seconds from scheduling to readiness, when both transitions exist.
    pub fn scheduled_to_ready_seconds(&self) -> Option<f64> {
        match (self.pod_scheduled_time, self.ready_time) {
            (Some(scheduled), Some(ready)) => {
                Some((ready - scheduled).num_milliseconds() as f64 / 1000.0)
            },
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodAsset {
    name: String,
    namespace: String,
    #[serde(default)]
    has_readiness_probe: bool,
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodCondition {
    #[serde(rename = "type")]
    type_: String,
    last_transition_time: Option<DateTime<Utc>>,
}

impl PodAsset {
    fn into_lifecycle(self) -> PodLifecycle {
        let mut pod_scheduled_time = None;
        let mut ready_time = None;
        for condition in &self.conditions {
            match condition.type_.as_str() {
                "PodScheduled" => pod_scheduled_time = condition.last_transition_time,
                "Ready" => ready_time = condition.last_transition_time,
                _ => {},
            }
        }
        PodLifecycle {
            name: self.name,
            namespace: self.namespace,
            has_readiness_probe: self.has_readiness_probe,
            pod_scheduled_time,
            ready_time,
        }
    }
}

/// Worst observed startup after Tukey-fence outlier removal.
///
/// Points outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]` are dropped before the
/// max is taken, so a single stuck pod does not dominate the budget.
pub fn max_startup_seconds(pods: &[PodLifecycle]) -> Option<f64> {
    let samples: Vec<f64> = pods
        .iter()
        .filter_map(PodLifecycle::scheduled_to_ready_seconds)
        .collect();
    if samples.is_empty() {
        return None;
    }

    let first_quartile = quantile(&samples, 0.25);
    let third_quartile = quantile(&samples, 0.75);
    let interquartile_range = third_quartile - first_quartile;
    tracing::info!(
        "First quartile: {}, third quartile: {}, interquartile range: {}",
        first_quartile,
        third_quartile,
        interquartile_range
    );

    let lower = first_quartile - 1.5 * interquartile_range;
    let upper = third_quartile + 1.5 * interquartile_range;
    samples
        .into_iter()
        .filter(|&s| s >= lower && s <= upper)
        .fold(None, |acc: Option<f64>, s| {
            Some(acc.map_or(s, |best| best.max(s)))
        })
}

/// Reads pod lifecycle conditions to measure real startup latency.
pub struct StartupProbe {
    client: reqwest::Client,
    base_url: String,
}

impl StartupProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Replace the budget's scheduled-to-ready component with the probed
    /// maximum. The budget keeps its configured defaults when the
    /// workload has no pod lifecycle data.
    pub async fn refresh_budget(
        &self,
        identity: &WorkloadIdentity,
        budget: &mut StartupBudget,
    ) -> Result<()> {
        tracing::info!("Calculating total startup time for workload {}", identity);
        let pods = self.fetch_workload_pods(identity).await?;
        if pods.is_empty() {
            tracing::warn!("No pod details available, keeping the configured startup time");
            return Ok(());
        }

        match max_startup_seconds(&pods) {
            Some(max_pod_startup_seconds) => {
                tracing::info!(
                    "Max pod startup time after filtering: {} seconds",
                    max_pod_startup_seconds
                );
                budget.scheduled_to_ready_seconds = max_pod_startup_seconds;
                tracing::info!(
                    "Updated workload startup budget: scheduled_to_ready_seconds: {}, total: {}",
                    budget.scheduled_to_ready_seconds,
                    budget.total_seconds()
                );
            },
            None => {
                tracing::warn!("No usable lifecycle transitions, keeping the configured startup time");
            },
        }
        Ok(())
    }

    async fn fetch_workload_pods(&self, identity: &WorkloadIdentity) -> Result<Vec<PodLifecycle>> {
        let url = format!(
            "{}/v1/projects/{}/locations/{}/clusters/{}/namespaces/{}/pods",
            self.base_url, identity.project, identity.location, identity.cluster, identity.namespace
        );
        let assets = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&[("controller", identity.controller_name.as_str())])
            .send()
            .await
            .with_context(|| format!("Failed to fetch workload pod details from {}", url))?
            .error_for_status()
            .context("Pod lifecycle request was rejected")?
            .json::<Vec<PodAsset>>()
            .await
            .context("Malformed pod lifecycle response")?;
        Ok(assets.into_iter().map(PodAsset::into_lifecycle).collect())
    }
}
