#[macro_use]
extern crate lazy_static;

use std::env;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod analyze;
mod plan;
mod simulate;
mod utils;

struct Endpoints {
    telemetry_url: String,
    lifecycle_url: String,
    warehouse_url: Option<String>,
}

lazy_static! {
    static ref ENDPOINTS: Endpoints = Endpoints {
        telemetry_url: env::var("TELEMETRY_API_URL")
            .unwrap_or_else(|_| "https://monitoring.googleapis.com".to_string()),
        lifecycle_url: env::var("LIFECYCLE_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
        warehouse_url: env::var("WAREHOUSE_APPEND_URL").ok(),
    };
}

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate candidate autoscaling plans from a trace file.
    Plan(plan::Arg),
    /// Replay a trace file and print the best recommendation.
    Simulate(simulate::Arg),
    /// Fetch telemetry for a workload and recommend a configuration.
    Analyze(analyze::Arg),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Plan(arg) => arg.handle().await?,
        Commands::Simulate(arg) => arg.handle().await?,
        Commands::Analyze(arg) => arg.handle().await?,
    }

    Ok(())
}
