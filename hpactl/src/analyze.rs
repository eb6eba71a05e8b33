use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Args;
use collectors::{startup::StartupProbe, telemetry::TelemetryClient, warehouse::WarehouseSink};
use recommender::recommend;
use resources::objects::{StartupBudget, WorkloadIdentity};
use tokio_util::sync::CancellationToken;

use crate::{
    utils::{load_config, no_recommendation, parse_analysis_window},
    ENDPOINTS,
};

#[derive(Args)]
pub struct Arg {
    /// Project the workload runs in.
    #[clap(long)]
    project: String,
    /// Cluster location.
    #[clap(long)]
    location: String,
    /// Cluster name.
    #[clap(long)]
    cluster: String,
    /// Workload namespace.
    #[clap(long)]
    namespace: String,
    /// Controller (Deployment) name.
    #[clap(long)]
    controller: String,
    /// Container to analyze.
    #[clap(long)]
    container: String,
    /// Analysis window start, ISO 8601.
    #[clap(long, value_name = "DATETIME")]
    start: String,
    /// Analysis window end, ISO 8601.
    #[clap(long, value_name = "DATETIME")]
    end: String,
    /// Optional YAML file with recommender tunables.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: Option<PathBuf>,
    /// Measure startup latency from pod lifecycle conditions instead of
    /// the configured default.
    #[clap(long)]
    probe_startup: bool,
    /// Append the winning analysis to the reporting warehouse.
    #[clap(long)]
    publish: bool,
}

impl Arg {
    pub async fn handle(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let (start, end) = parse_analysis_window(&self.start, &self.end)?;
        let identity = self.identity()?;

        let telemetry = TelemetryClient::new(ENDPOINTS.telemetry_url.as_str());
        let trace = telemetry
            .fetch_workload_trace(&config, &identity, start, end)
            .await?;

        let mut startup_budget = StartupBudget::from_config(&config);
        if self.probe_startup {
            StartupProbe::new(ENDPOINTS.lifecycle_url.as_str())
                .refresh_budget(&identity, &mut startup_budget)
                .await?;
        }

        let outcome = recommend(
            &identity,
            &startup_budget,
            &trace,
            &config,
            &CancellationToken::new(),
        )
        .await?;

        match (&outcome.best, &outcome.best_analysis) {
            (Some(rec), Some(series)) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "recommendation": rec,
                        "reasons": outcome.reasons,
                    }))?
                );
                if self.publish {
                    match &ENDPOINTS.warehouse_url {
                        Some(url) => {
                            WarehouseSink::new(url.as_str()).append(series, rec).await?;
                        },
                        None => tracing::warn!(
                            "WAREHOUSE_APPEND_URL is not set, skipping the warehouse append"
                        ),
                    }
                }
                Ok(())
            },
            _ => Err(no_recommendation(&outcome.reasons)),
        }
    }

    fn identity(&self) -> Result<WorkloadIdentity> {
        for (name, value) in [
            ("project", &self.project),
            ("location", &self.location),
            ("cluster", &self.cluster),
            ("namespace", &self.namespace),
            ("controller", &self.controller),
            ("container", &self.container),
        ] {
            ensure!(!value.trim().is_empty(), "missing workload detail: {}", name);
        }
        Ok(WorkloadIdentity {
            project: self.project.clone(),
            location: self.location.clone(),
            cluster: self.cluster.clone(),
            namespace: self.namespace.clone(),
            controller_name: self.controller.clone(),
            controller_type: "Deployment".to_string(),
            container_name: self.container.clone(),
        })
    }
}
