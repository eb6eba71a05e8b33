use chrono::Duration;
use resources::{
    config::RecommenderConfig,
    objects::AnalysisSeries,
    utils::{mean, round_half_up},
};

/// Fill the savings columns of a simulated series.
///
/// CPU savings are measured against the currently requested capacity,
/// memory savings converted to CPU-equivalents through the configured
/// GB-to-CPU cost ratio. A 1-day rolling mean (right-closed window,
/// min_periods = 1) is kept for display.
pub fn calculate_savings(series: &mut AnalysisSeries, config: &RecommenderConfig) {
    if series.is_empty() {
        tracing::info!("The analysis series is empty");
        return;
    }

    let n = series.len();
    series.forecast_cpu_saving = Vec::with_capacity(n);
    series.forecast_mem_saving_mi = Vec::with_capacity(n);
    series.avg_saving_in_cpus = Vec::with_capacity(n);
    series.forecast_clash = Vec::with_capacity(n);

    for i in 0..n {
        let cpu_saving = round_half_up(
            series.sum_containers_cpu_request[i] - series.forecast_sum_cpu_up_and_running[i],
            3,
        );
        let mem_saving = (series.sum_containers_mem_request_mi[i]
            - series.forecast_sum_mem_up_and_running[i])
            .ceil();
        series.forecast_cpu_saving.push(cpu_saving);
        series.forecast_mem_saving_mi.push(mem_saving);
        series.avg_saving_in_cpus.push(round_half_up(
            cpu_saving + (mem_saving / 1024.0) / config.cost_of_gb_in_cpus,
            2,
        ));
        series.forecast_clash.push(
            series.sum_containers_cpu_usage[i] > series.forecast_sum_cpu_up_and_running[i]
                || series.sum_containers_mem_usage_mi[i]
                    > series.forecast_sum_mem_up_and_running[i],
        );
    }

    series.avg_saving_in_cpus_1d_mean = rolling_day_mean(series);
}

/// Mean of `avg_saving_in_cpus` over the trailing day per row, by
/// timestamp. The window is left-open: a point exactly one day old falls
/// out.
fn rolling_day_mean(series: &AnalysisSeries) -> Vec<f64> {
    let mut rolling = Vec::with_capacity(series.len());
    let mut start = 0usize;
    for i in 0..series.len() {
        let cutoff = series.window_begin[i] - Duration::days(1);
        while series.window_begin[start] <= cutoff {
            start += 1;
        }
        rolling.push(round_half_up(
            mean(series.avg_saving_in_cpus[start..=i].iter().copied()),
            2,
        ));
    }
    rolling
}
