use std::path::Path;

use anyhow::{anyhow, ensure, Context, Result};
use chrono::{DateTime, Duration, Utc};
use config::{Config, Environment, File};
use resources::{
    config::RecommenderConfig,
    objects::{AnalysisSeries, ReasonMap, TraceRow, WorkloadTrace},
};

/// How far back an analysis window may start.
const MAX_LOOKBACK_DAYS: i64 = 42;

/// Layer defaults, an optional YAML file and environment overrides into
/// one immutable config value.
pub fn load_config(path: Option<&Path>) -> Result<RecommenderConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    let config = builder
        .add_source(Environment::default())
        .build()
        .and_then(|raw| raw.try_deserialize::<RecommenderConfig>())
        .with_context(|| "Failed to parse config".to_string())?;
    config.validate()?;
    Ok(config)
}

/// Read per-window usage rows from a CSV file and normalize them.
pub fn read_trace_csv(path: &Path) -> Result<WorkloadTrace> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open trace file {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.deserialize::<TraceRow>() {
        rows.push(record.with_context(|| format!("Malformed trace row in {}", path.display()))?);
    }
    Ok(WorkloadTrace::normalize(rows))
}

/// Write the analysis series of one plan back out as CSV.
pub fn write_analysis_csv(path: &Path, series: &AnalysisSeries) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([
        "window_begin",
        "num_replicas_at_usage_window",
        "sum_containers_cpu_request",
        "sum_containers_cpu_usage",
        "forecast_sum_cpu_up_and_running",
        "sum_containers_mem_request_mi",
        "sum_containers_mem_usage_mi",
        "forecast_sum_mem_up_and_running",
        "forecast_replicas_up_and_running",
        "forecast_replicas_desired",
        "scale_up_behaviour_to_x_times",
        "forecast_cpu_saving",
        "forecast_mem_saving_mi",
        "avg_saving_in_cpus",
        "avg_saving_in_cpus_1d_mean",
        "forecast_clash",
        "method",
    ])?;
    for i in 0..series.len() {
        writer.write_record([
            series.window_begin[i].format("%Y-%m-%dT%H:%M:%S").to_string(),
            series.num_replicas_at_usage_window[i].to_string(),
            series.sum_containers_cpu_request[i].to_string(),
            series.sum_containers_cpu_usage[i].to_string(),
            series.forecast_sum_cpu_up_and_running[i].to_string(),
            series.sum_containers_mem_request_mi[i].to_string(),
            series.sum_containers_mem_usage_mi[i].to_string(),
            series.forecast_sum_mem_up_and_running[i].to_string(),
            series.forecast_replicas_up_and_running[i].to_string(),
            series.forecast_replicas_desired[i].to_string(),
            series.scale_up_behaviour_to_x_times[i].to_string(),
            series.forecast_cpu_saving[i].to_string(),
            series.forecast_mem_saving_mi[i].to_string(),
            series.avg_saving_in_cpus[i].to_string(),
            series.avg_saving_in_cpus_1d_mean[i].to_string(),
            series.forecast_clash[i].to_string(),
            series.method.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse and validate the ISO 8601 analysis window.
pub fn parse_analysis_window(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = DateTime::parse_from_rfc3339(start)
        .with_context(|| format!("Invalid ISO 8601 datetime: {}", start))?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(end)
        .with_context(|| format!("Invalid ISO 8601 datetime: {}", end))?
        .with_timezone(&Utc);
    ensure!(start < end, "analysis window start must be strictly before its end");
    ensure!(
        start >= Utc::now() - Duration::days(MAX_LOOKBACK_DAYS),
        "analysis window start must be within the last {} days",
        MAX_LOOKBACK_DAYS
    );
    Ok((start, end))
}

/// Print the machine-readable reason map and produce the failure the
/// driver exits non-zero with.
pub fn no_recommendation(reasons: &ReasonMap) -> anyhow::Error {
    match serde_json::to_string_pretty(&serde_json::json!({ "reasons": reasons })) {
        Ok(rendered) => println!("{}", rendered),
        Err(err) => tracing::error!("Failed to render reasons: {}", err),
    }
    anyhow!("no recommendation generated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_must_be_ordered_and_recent() {
        let now = Utc::now();
        let start = (now - Duration::days(2)).to_rfc3339();
        let end = (now - Duration::days(1)).to_rfc3339();
        assert!(parse_analysis_window(&start, &end).is_ok());
        assert!(parse_analysis_window(&end, &start).is_err());

        let stale = (now - Duration::days(60)).to_rfc3339();
        assert!(parse_analysis_window(&stale, &end).is_err());
        assert!(parse_analysis_window("yesterday", &end).is_err());
    }
}
