use resources::{
    config::RecommenderConfig,
    objects::{WorkloadPlan, WorkloadTrace},
    utils::{nan_max, nan_min, round_half_up},
};

use crate::slope::SlopeAnalysis;

/// Size the HPA target, slope and CPU limit of a horizontal plan, or
/// explain why the plan must be skipped.
///
/// Only the trace rows at or above the plan's CPU baseline matter: below
/// it the HPA would not be scaling on CPU at all.
pub fn size_plan_targets(
    config: &RecommenderConfig,
    plan: &mut WorkloadPlan,
    trace: &WorkloadTrace,
    slope: &SlopeAnalysis,
) -> Result<(), String> {
    let baseline = plan.recommended_cpu_request;
    let above_baseline: Vec<usize> = trace
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| row.avg_container_cpu_usage >= baseline)
        .map(|(i, _)| i)
        .collect();
    if above_baseline.is_empty() {
        return Err(format!(
            "Skip HPA plan {}. No usage above CPU baseline requests: {:.2}.",
            plan.method, baseline
        ));
    }

    let max_usage_slope_up_ratio = round_half_up(
        nan_max(
            above_baseline
                .iter()
                .map(|&i| slope.max_usage_slope_up_ratio[i]),
        ),
        2,
    );
    if max_usage_slope_up_ratio > config.hpa_scale_limit {
        return Err(format!(
            "Skip HPA plan {}. Slope ratio {} exceeds HPA scale limit {}.",
            plan.method, max_usage_slope_up_ratio, config.hpa_scale_limit
        ));
    }
    plan.max_usage_slope_up_ratio = max_usage_slope_up_ratio;

    // Zero slopes divide to infinity and simply never win the minimum.
    plan.recommended_hpa_target_cpu = round_half_up(
        nan_min(
            above_baseline
                .iter()
                .map(|&i| (1.0 - config.hpa_target_buffer) / slope.max_usage_slope_up_ratio[i]),
        ),
        2,
    );
    if plan.recommended_hpa_target_cpu < config.min_hpa_target_cpu
        || plan.recommended_hpa_target_cpu > config.max_hpa_target_cpu
    {
        return Err(format!(
            "Skip HPA plan {}. Recommended target CPU {} not between {} and {}.",
            plan.method,
            plan.recommended_hpa_target_cpu,
            config.min_hpa_target_cpu,
            config.max_hpa_target_cpu
        ));
    }

    plan.recommended_cpu_limit_or_unbounded = (plan.recommended_cpu_request
        + nan_max(above_baseline.iter().map(|&i| slope.max_cpu_in_horizon[i]))
            / plan.recommended_max_replicas as f64)
        .ceil();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{slope::analyze_slope_up, testutil::cpu_usage_trace};

    fn plan_with_baseline(cpu: f64) -> WorkloadPlan {
        let mut plan = WorkloadPlan::new("DCR-50".to_string(), cpu, 64.0, 3, 4);
        plan.workload_e2e_startup_latency_rows = 2;
        plan
    }

    #[test]
    fn sizes_target_and_limit_from_rows_above_baseline() {
        let config = RecommenderConfig::default();
        let trace = cpu_usage_trace(&[1.0, 2.0, 4.0, 1.0]);
        let slope = analyze_slope_up(&trace, 2).unwrap();

        let mut plan = plan_with_baseline(2.0);
        size_plan_targets(&config, &mut plan, &trace, &slope).unwrap();
        // Rows 1 and 2 qualify; their slopes are 2.0 and 1.0.
        assert!((plan.max_usage_slope_up_ratio - 2.0).abs() < 1e-12);
        assert!((plan.recommended_hpa_target_cpu - 0.45).abs() < 1e-12);
        // ceil(2.0 + 4.0 / 4 replicas)
        assert_eq!(plan.recommended_cpu_limit_or_unbounded, 3.0);
    }

    #[test]
    fn rejects_when_no_usage_reaches_baseline() {
        let config = RecommenderConfig::default();
        let trace = cpu_usage_trace(&[1.0, 2.0, 4.0, 1.0]);
        let slope = analyze_slope_up(&trace, 2).unwrap();

        let mut plan = plan_with_baseline(5.0);
        let reason = size_plan_targets(&config, &mut plan, &trace, &slope).unwrap_err();
        assert!(reason.contains("No usage above CPU baseline"));
    }

    #[test]
    fn rejects_slopes_beyond_the_scale_limit() {
        let config = RecommenderConfig {
            hpa_scale_limit: 1.5,
            ..RecommenderConfig::default()
        };
        let trace = cpu_usage_trace(&[1.0, 2.0, 4.0, 1.0]);
        let slope = analyze_slope_up(&trace, 2).unwrap();

        let mut plan = plan_with_baseline(1.0);
        let reason = size_plan_targets(&config, &mut plan, &trace, &slope).unwrap_err();
        assert!(reason.contains("exceeds HPA scale limit"));
    }

    #[test]
    fn rejects_targets_outside_the_configured_range() {
        let config = RecommenderConfig::default();
        // Slope of 2.3 pushes the target to 0.39, just under the floor.
        let trace = cpu_usage_trace(&[1.0, 2.3, 1.0]);
        let slope = analyze_slope_up(&trace, 2).unwrap();

        let mut plan = plan_with_baseline(1.0);
        let reason = size_plan_targets(&config, &mut plan, &trace, &slope).unwrap_err();
        assert!(reason.contains("not between"));
    }
}
