use anyhow::{ensure, Result};
use resources::{objects::WorkloadTrace, utils::nan_max};

/// Forward-looking usage maxima and slope-up ratios, one entry per trace
/// row.
///
/// The slope quantifies how far load can rise within one scaling reaction
/// time; the validator uses it to bound the feasible HPA target.
#[derive(Debug, Clone, PartialEq)]
pub struct SlopeAnalysis {
    /// Max per-replica CPU usage over `[i, i+latency_rows)`; NaN where the
    /// horizon extends past the end of the trace.
    pub max_cpu_in_horizon: Vec<f64>,
    /// Max worst-case container memory over the same horizon; NaN at the
    /// tail as above.
    pub max_mem_in_horizon: Vec<f64>,
    /// `max(cpu_ratio, mem_ratio)` per row; rows without a full horizon,
    /// and rows with zero current usage, contribute 0.
    pub max_usage_slope_up_ratio: Vec<f64>,
}

/// Compute the slope-up analysis for `latency_rows` rows of reaction time.
pub fn analyze_slope_up(trace: &WorkloadTrace, latency_rows: usize) -> Result<SlopeAnalysis> {
    ensure!(
        latency_rows > 0,
        "workload_e2e_startup_latency_rows must be greater than 0"
    );

    let rows = trace.rows();
    let n = rows.len();
    let mut max_cpu_in_horizon = Vec::with_capacity(n);
    let mut max_mem_in_horizon = Vec::with_capacity(n);
    let mut max_usage_slope_up_ratio = Vec::with_capacity(n);

    for i in 0..n {
        let (cpu_horizon, mem_horizon) = if i + latency_rows <= n {
            let window = &rows[i..i + latency_rows];
            (
                nan_max(window.iter().map(|r| r.avg_container_cpu_usage)),
                nan_max(window.iter().map(|r| r.max_containers_mem_usage_mi)),
            )
        } else {
            (f64::NAN, f64::NAN)
        };

        let cpu_ratio = ratio_or_zero(cpu_horizon, rows[i].avg_container_cpu_usage);
        let mem_ratio = ratio_or_zero(mem_horizon, rows[i].max_containers_mem_usage_mi);

        max_cpu_in_horizon.push(cpu_horizon);
        max_mem_in_horizon.push(mem_horizon);
        max_usage_slope_up_ratio.push(cpu_ratio.max(mem_ratio));
    }

    Ok(SlopeAnalysis {
        max_cpu_in_horizon,
        max_mem_in_horizon,
        max_usage_slope_up_ratio,
    })
}

fn ratio_or_zero(horizon_max: f64, current: f64) -> f64 {
    if horizon_max.is_nan() || current == 0.0 {
        0.0
    } else {
        horizon_max / current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::cpu_usage_trace;

    #[test]
    fn rejects_zero_latency() {
        let trace = cpu_usage_trace(&[1.0, 2.0]);
        assert!(analyze_slope_up(&trace, 0).is_err());
    }

    #[test]
    fn slope_is_peak_future_over_current() {
        let trace = cpu_usage_trace(&[1.0, 2.0, 4.0, 1.0]);
        let slope = analyze_slope_up(&trace, 2).unwrap();

        assert_eq!(slope.max_cpu_in_horizon[0], 2.0);
        assert_eq!(slope.max_cpu_in_horizon[1], 4.0);
        assert_eq!(slope.max_cpu_in_horizon[2], 4.0);
        assert!(slope.max_cpu_in_horizon[3].is_nan());

        // Memory is constant in the fixture, so CPU dominates everywhere
        // except the horizonless tail row.
        assert_eq!(slope.max_usage_slope_up_ratio, vec![2.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn zero_usage_rows_contribute_zero_cpu_ratio() {
        let trace = cpu_usage_trace(&[0.0, 0.0]);
        let slope = analyze_slope_up(&trace, 1).unwrap();
        // Memory in the fixture is non-zero and flat, so its ratio is 1.
        assert_eq!(slope.max_usage_slope_up_ratio, vec![1.0, 1.0]);
    }

    #[test]
    fn horizon_longer_than_trace_zeroes_every_slope() {
        let trace = cpu_usage_trace(&[1.0, 2.0]);
        let slope = analyze_slope_up(&trace, 5).unwrap();
        assert_eq!(slope.max_usage_slope_up_ratio, vec![0.0, 0.0]);
    }
}
