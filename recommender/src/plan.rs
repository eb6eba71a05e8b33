use std::collections::HashSet;

use anyhow::Result;
use resources::{
    config::RecommenderConfig,
    objects::{ReasonMap, StartupBudget, WorkloadIdentity, WorkloadPlan, WorkloadTrace},
    utils::{percentile, round_half_up},
};

use crate::{
    capacity::recommended_max_cpu_capacity, slope::analyze_slope_up, validate::size_plan_targets,
};

/// Minimum replica count the workload actually sustains.
///
/// Node autoscaling can briefly evict replicas below the desired count, so
/// the 10th percentile of positive replica observations is used rather
/// than the raw minimum. Falls back to the configured floor when no window
/// saw a positive count.
pub fn observed_min_replicas(config: &RecommenderConfig, trace: &WorkloadTrace) -> u32 {
    let positive: Vec<f64> = trace
        .rows()
        .iter()
        .filter(|row| row.num_replicas_at_usage_window > 0)
        .map(|row| row.num_replicas_at_usage_window as f64)
        .collect();
    if positive.is_empty() {
        return config.min_rec_replicas;
    }
    percentile(&positive, 10.0).ceil() as u32
}

/// Per-replica memory request for a plan running `proposed_min_replicas`.
///
/// The peak total memory split across the replicas, capped by the mean
/// per-container usage, with the configured headroom on top.
fn propose_memory_mi(
    config: &RecommenderConfig,
    trace: &WorkloadTrace,
    proposed_min_replicas: u32,
) -> f64 {
    let total_memory_capacity = trace.max_of(|row| row.sum_containers_mem_usage_mi);
    let replicas = proposed_min_replicas.max(config.min_rec_replicas);
    let per_replica = total_memory_capacity / replicas as f64;
    let recommendation = per_replica.min(trace.mean_of(|row| row.avg_container_mem_usage_mi));
    (recommendation * config.extra_hpa_buffer_for_memory_recommendation.max(1.0)).ceil()
}

/// Whether per-replica CPU usage is evenly spread across the fleet.
///
/// Observed for diagnostics only; both plan families size from the mean
/// regardless of the answer.
fn is_workload_balanced(trace: &WorkloadTrace) -> Option<bool> {
    if trace.is_empty() {
        tracing::warn!("Workload trace is empty");
        return None;
    }
    let avg_cpu_usage = trace.mean_of(|row| row.avg_container_cpu_usage);
    let stddev_cpu_usage = trace.mean_of(|row| row.stddev_containers_cpu_usage);
    if avg_cpu_usage == 0.0 {
        tracing::info!("Division by zero in workload balancing calculation");
        return None;
    }
    let ratio = (2.0 * stddev_cpu_usage) / avg_cpu_usage;
    let is_balanced = ratio < 0.25;
    tracing::info!("Workload is balanced: {} (ratio = {:.3})", is_balanced, ratio);
    Some(is_balanced)
}

/// DCR family: one candidate per usage percentile.
fn dynamic_cpu_request_plans(
    config: &RecommenderConfig,
    max_cpu_capacity: f64,
    trace: &WorkloadTrace,
) -> Vec<WorkloadPlan> {
    let min_replicas = observed_min_replicas(config, trace).max(config.min_rec_replicas);
    let proposed_mem_request_mi = propose_memory_mi(config, trace, min_replicas);

    let usage: Vec<f64> = trace
        .rows()
        .iter()
        .map(|row| row.avg_container_cpu_usage)
        .collect();

    let mut plans = Vec::new();
    let mut seen = HashSet::new();
    for p in config.min_dcr_percentile_value..=config.max_dcr_percentile_value {
        let cpu_request = round_half_up(percentile(&usage, p as f64), config.mcpu_rounding)
            .max(config.min_cpu_core_proposed_value);
        let max_replicas = (max_cpu_capacity / cpu_request).ceil() as u32;
        let combination = (
            (cpu_request * 1000.0).round() as u64,
            min_replicas,
            max_replicas,
        );
        if seen.insert(combination) {
            plans.push(WorkloadPlan::new(
                format!("DCR-{}", p),
                cpu_request,
                proposed_mem_request_mi,
                min_replicas,
                max_replicas,
            ));
        }
    }
    tracing::info!("Generated {} dynamic CPU request (DCR) options", plans.len());
    plans
}

/// DMR family: sweep the minimum replica count while holding the CPU
/// request at mean usage.
fn dynamic_min_replicas_plans(
    config: &RecommenderConfig,
    max_cpu_capacity: f64,
    trace: &WorkloadTrace,
) -> Vec<WorkloadPlan> {
    if let Some(balanced) = is_workload_balanced(trace) {
        tracing::debug!("Workload balance assessment: {}", balanced);
    }
    // Sizing always follows the mean; the balance assessment above never
    // switches the method.
    let scaling_method = "mean";
    let proposed_cpu_request = round_half_up(
        trace.mean_of(|row| row.avg_container_cpu_usage),
        config.mcpu_rounding,
    );
    if proposed_cpu_request == 0.0 {
        tracing::warn!("Proposed CPU request is 0, no replicas can be recommended");
        return Vec::new();
    }

    let max_sum_cpu_usage = trace.max_of(|row| row.sum_containers_cpu_usage);
    let mut min_replicas = config.min_rec_replicas;
    let mut max_replicas = (max_cpu_capacity / proposed_cpu_request).ceil() as u32;

    let mut plans = Vec::new();
    let mut seen = HashSet::new();
    while min_replicas < max_replicas {
        // The rounded mean is constant across passes.
        let cpu_request =
            round_half_up(proposed_cpu_request, 3).max(config.min_cpu_core_proposed_value);
        if min_replicas as f64 * cpu_request > max_sum_cpu_usage {
            break;
        }
        max_replicas = (max_cpu_capacity / cpu_request).ceil() as u32;
        let proposed_mem_request_mi = propose_memory_mi(config, trace, max_replicas);

        let combination = (
            (cpu_request * 1000.0).round() as u64,
            min_replicas,
            max_replicas,
        );
        if seen.insert(combination) {
            plans.push(WorkloadPlan::new(
                format!("DMR_{}-loop_{}", scaling_method, min_replicas),
                cpu_request,
                proposed_mem_request_mi.ceil(),
                min_replicas,
                max_replicas,
            ));
        }
        min_replicas += 1;
    }
    tracing::info!(
        "Generated {} dynamic minimum replicas (DMR-{}) options",
        plans.len(),
        scaling_method
    );
    plans
}

/// The static fallback: hold the replica count and size requests from
/// aggregate usage quantiles.
fn vpa_plan(config: &RecommenderConfig, trace: &WorkloadTrace) -> WorkloadPlan {
    let num_of_replicas = trace
        .rows()
        .iter()
        .map(|row| row.num_replicas_at_usage_window)
        .min()
        .unwrap_or(0)
        .max(config.min_rec_replicas);
    let replicas = num_of_replicas as f64;

    let mut plan = WorkloadPlan::new(
        "VPA".to_string(),
        round_half_up(
            trace.quantile_of(|row| row.sum_containers_cpu_usage, 0.98) / replicas
                * config.extra_hpa_buffer_for_cpu_usage_capacity,
            3,
        ),
        (trace.max_of(|row| row.sum_containers_mem_usage_mi) / replicas
            * config.extra_vpa_buffer_for_memory_recommendation)
            .ceil(),
        num_of_replicas,
        num_of_replicas,
    );
    plan.recommended_cpu_limit_or_unbounded = (trace
        .max_of(|row| row.sum_containers_cpu_usage)
        / replicas
        * config.extra_hpa_buffer_for_cpu_usage_capacity)
        .ceil();
    plan.recommended_hpa_target_cpu = 1.0;
    plan.workload_e2e_startup_latency_rows = 1;
    plan
}

/// Drop duplicate candidates and fix the presentation order.
fn unique_sorted(plans: Vec<WorkloadPlan>) -> Vec<WorkloadPlan> {
    let mut seen = HashSet::new();
    let mut unique: Vec<WorkloadPlan> = plans
        .into_iter()
        .filter(|plan| seen.insert(plan.dedup_key()))
        .collect();
    unique.sort_by(|a, b| a.presentation_order(b));
    unique
}

/// Generate every candidate plan for the workload.
///
/// Returns the surviving plans (always ending with the VPA fallback when
/// any horizontal candidate was generated) and the rejection reason per
/// discarded method.
pub fn build_plans(
    identity: &WorkloadIdentity,
    startup_budget: &StartupBudget,
    trace: &WorkloadTrace,
    config: &RecommenderConfig,
) -> Result<(Vec<WorkloadPlan>, ReasonMap)> {
    config.validate()?;
    tracing::info!("Starting simulation planning for {}", identity);

    let mut reasons = ReasonMap::new();
    if trace.is_empty() {
        tracing::warn!("The workload trace is empty, exiting simulation planning");
        reasons.insert("general".to_string(), "Workload dataframe is empty.".to_string());
        return Ok((Vec::new(), reasons));
    }

    let max_cpu_capacity = recommended_max_cpu_capacity(config, trace);
    if max_cpu_capacity == 0.0 {
        tracing::warn!("CPU max capacity is 0, exiting simulation planning");
        reasons.insert("general".to_string(), "CPU Max Capacity is 0.".to_string());
        return Ok((Vec::new(), reasons));
    }

    let mut candidates = dynamic_cpu_request_plans(config, max_cpu_capacity, trace);
    candidates.extend(dynamic_min_replicas_plans(config, max_cpu_capacity, trace));
    let candidates = unique_sorted(candidates);
    if candidates.is_empty() {
        tracing::info!("No candidate plans generated for {}", identity);
        reasons.insert(
            "general".to_string(),
            "No valid recommendations generated.".to_string(),
        );
        return Ok((Vec::new(), reasons));
    }

    let latency_rows = startup_budget.latency_rows(config.distance_between_points_seconds)?;
    let slope = analyze_slope_up(trace, latency_rows)?;

    let mut plans = Vec::new();
    for mut plan in candidates {
        plan.workload_e2e_startup_latency_rows = latency_rows;
        match size_plan_targets(config, &mut plan, trace, &slope) {
            Ok(()) => plans.push(plan),
            Err(reason) => {
                tracing::info!("{}", reason);
                reasons.insert(plan.method.clone(), reason);
            },
        }
    }
    plans.push(vpa_plan(config, trace));

    tracing::info!(
        "Simulation planning completed with {} plans for {}",
        plans.len(),
        identity
    );
    Ok((plans, reasons))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{steady_trace, test_identity, trace_from};

    fn default_budget() -> StartupBudget {
        // 120 seconds total: two rows of latency on 60s windows.
        StartupBudget {
            scheduled_to_ready_seconds: 20.0,
            hpa_processing_seconds: 45.0,
            cluster_autoscaler_seconds: 55.0,
        }
    }

    #[test]
    fn min_replicas_falls_back_without_positive_windows() {
        let config = RecommenderConfig::default();
        let mut rows = steady_trace(4, 4, 0.1).rows().to_vec();
        for row in &mut rows {
            row.num_replicas_at_usage_window = 0;
        }
        assert_eq!(observed_min_replicas(&config, &trace_from(rows)), 3);
    }

    #[test]
    fn min_replicas_uses_tenth_percentile() {
        let config = RecommenderConfig::default();
        let trace = steady_trace(10, 5, 0.1);
        assert_eq!(observed_min_replicas(&config, &trace), 5);
    }

    #[test]
    fn empty_trace_yields_general_reason() {
        let config = RecommenderConfig::default();
        let (plans, reasons) = build_plans(
            &test_identity(),
            &default_budget(),
            &trace_from(vec![]),
            &config,
        )
        .unwrap();
        assert!(plans.is_empty());
        assert_eq!(reasons["general"], "Workload dataframe is empty.");
    }

    #[test]
    fn zero_capacity_yields_general_reason() {
        let config = RecommenderConfig::default();
        let mut rows = steady_trace(4, 4, 0.0).rows().to_vec();
        for row in &mut rows {
            row.avg_container_cpu_request = 0.0;
        }
        let (plans, reasons) = build_plans(
            &test_identity(),
            &default_budget(),
            &trace_from(rows),
            &config,
        )
        .unwrap();
        assert!(plans.is_empty());
        assert_eq!(reasons["general"], "CPU Max Capacity is 0.");
    }

    #[test]
    fn steady_workload_produces_expected_families() {
        let config = RecommenderConfig::default();
        let trace = steady_trace(4, 4, 0.1);
        let (plans, reasons) =
            build_plans(&test_identity(), &default_budget(), &trace, &config).unwrap();

        let methods: Vec<&str> = plans.iter().map(|p| p.method.as_str()).collect();
        assert_eq!(
            methods,
            vec!["DCR-10", "DMR_mean-loop_3", "DMR_mean-loop_4", "VPA"]
        );
        assert!(reasons.is_empty());

        // DCR: constant usage 0.1 collapses every percentile to one plan.
        let dcr = &plans[0];
        assert!((dcr.recommended_cpu_request - 0.1).abs() < 1e-12);
        assert_eq!(dcr.recommended_min_replicas, 4);
        assert_eq!(dcr.recommended_max_replicas, 20);
        assert_eq!(dcr.recommended_mem_request_and_limits_mi, 105.0);
        assert!((dcr.recommended_hpa_target_cpu - 0.9).abs() < 1e-12);
        assert_eq!(dcr.workload_e2e_startup_latency_rows, 2);

        // DMR sweeps min replicas from the floor until capacity is covered.
        let dmr = &plans[1];
        assert_eq!(dmr.recommended_min_replicas, 3);
        assert_eq!(dmr.recommended_max_replicas, 20);
        assert_eq!(dmr.recommended_mem_request_and_limits_mi, 26.0);

        // VPA holds the observed fleet and sizes from aggregate quantiles.
        let vpa = &plans[3];
        assert_eq!(vpa.recommended_min_replicas, 4);
        assert_eq!(vpa.recommended_max_replicas, 4);
        assert!((vpa.recommended_cpu_request - 0.105).abs() < 1e-12);
        assert_eq!(vpa.recommended_cpu_limit_or_unbounded, 1.0);
        assert_eq!(vpa.recommended_mem_request_and_limits_mi, 126.0);
        assert!((vpa.recommended_hpa_target_cpu - 1.0).abs() < 1e-12);
        assert_eq!(vpa.workload_e2e_startup_latency_rows, 1);
    }

    #[test]
    fn generated_plans_have_no_duplicates_and_ordered_bounds() {
        let config = RecommenderConfig::default();
        let trace = steady_trace(20, 4, 0.1);
        let (plans, _) =
            build_plans(&test_identity(), &default_budget(), &trace, &config).unwrap();

        let mut seen = HashSet::new();
        for plan in &plans {
            assert!(seen.insert(plan.dedup_key()), "duplicate {:?}", plan.method);
            assert!(plan.recommended_min_replicas <= plan.recommended_max_replicas);
            assert!(plan.recommended_cpu_request >= config.min_cpu_core_proposed_value);
        }
    }
}
