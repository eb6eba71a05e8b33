use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use recommender::build_plans;
use resources::objects::{StartupBudget, WorkloadIdentity};

use crate::utils::{load_config, read_trace_csv};

#[derive(Args)]
pub struct Arg {
    /// Trace CSV file with per-window usage aggregates.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    trace: PathBuf,
    /// Optional YAML file with recommender tunables.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: Option<PathBuf>,
    /// Measured pod scheduled-to-ready time in seconds.
    #[clap(long, value_name = "SECONDS")]
    scheduled_to_ready: Option<f64>,
    /// Controller (Deployment) name used for log correlation.
    #[clap(long, default_value = "workload")]
    controller: String,
    /// Container name used for log correlation.
    #[clap(long, default_value = "app")]
    container: String,
}

impl Arg {
    pub async fn handle(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let trace = read_trace_csv(&self.trace)?;
        let identity = WorkloadIdentity {
            project: "local".to_string(),
            location: "local".to_string(),
            cluster: "local".to_string(),
            namespace: "default".to_string(),
            controller_name: self.controller.clone(),
            controller_type: "Deployment".to_string(),
            container_name: self.container.clone(),
        };
        let mut startup_budget = StartupBudget::from_config(&config);
        if let Some(seconds) = self.scheduled_to_ready {
            startup_budget.scheduled_to_ready_seconds = seconds;
        }

        let (plans, reasons) = build_plans(&identity, &startup_budget, &trace, &config)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "plans": plans,
                "reasons": reasons,
            }))?
        );
        Ok(())
    }
}
