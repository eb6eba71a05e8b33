use std::{sync::Arc, thread::available_parallelism};

use anyhow::{Context, Result};
use resources::{
    config::RecommenderConfig,
    objects::{
        AnalysisSeries, ReasonMap, StartupBudget, WorkloadIdentity, WorkloadPlan,
        WorkloadRecommendation, WorkloadTrace,
    },
    utils::{mean, nan_max, round_half_up},
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::savings::calculate_savings;

/// Simulation result for one plan: the verdict-carrying recommendation
/// and, for plans that survived, the per-window analysis series.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub analysis: Option<AnalysisSeries>,
    pub recommendation: WorkloadRecommendation,
}

/// Result of simulating a whole plan set against one trace.
#[derive(Debug, Clone, Default)]
pub struct SimulationBatch {
    pub best_analysis: Option<AnalysisSeries>,
    pub best: Option<WorkloadRecommendation>,
    pub reasons: ReasonMap,
    pub analyses: Vec<AnalysisSeries>,
}

/// Re-check the gates a plan must hold before it is worth simulating.
fn plan_validity_guard(config: &RecommenderConfig, plan: &WorkloadPlan) -> Result<(), String> {
    if plan.max_usage_slope_up_ratio > config.hpa_scale_limit {
        return Err(format!(
            "max usage slope-up ratio {} exceeds HPA scale limit {}",
            plan.max_usage_slope_up_ratio, config.hpa_scale_limit
        ));
    }
    if plan.recommended_min_replicas > plan.recommended_max_replicas {
        return Err(format!(
            "min replicas {} greater than max replicas {}",
            plan.recommended_min_replicas, plan.recommended_max_replicas
        ));
    }
    if plan.recommended_hpa_target_cpu < config.min_hpa_target_cpu {
        return Err(format!(
            "recommended HPA target CPU {} is less than the minimum {}",
            plan.recommended_hpa_target_cpu, config.min_hpa_target_cpu
        ));
    }
    Ok(())
}

/// Replicas needed to carry the load seen during the first reaction window.
fn starting_replicas(trace: &WorkloadTrace, plan: &WorkloadPlan) -> u32 {
    let rows = trace.rows();
    let horizon = (plan.workload_e2e_startup_latency_rows + 1).min(rows.len());
    let max_cpu = nan_max(
        rows[..horizon]
            .iter()
            .map(|row| row.sum_containers_cpu_usage),
    );
    let starting = (max_cpu / plan.recommended_cpu_request).ceil() as u32;
    starting.clamp(plan.recommended_min_replicas, plan.recommended_max_replicas)
}

/// Replay the trace under the plan's scaling policy.
///
/// Returns the forecast series, or `None` after a capacity clash or a
/// cancellation; in both cases the recommendation carries the verdict.
fn simulate_plan(
    config: &RecommenderConfig,
    rec: &mut WorkloadRecommendation,
    trace: &WorkloadTrace,
    starting_replicas: u32,
    cancel: &CancellationToken,
) -> Option<AnalysisSeries> {
    let plan = rec.plan.clone();
    let mut series = AnalysisSeries::from_trace(&plan.method, trace);
    let n = trace.len();

    if plan.method == "VPA" {
        let replicas = plan.recommended_max_replicas;
        series.forecast_replicas_up_and_running = vec![replicas; n];
        series.forecast_sum_cpu_up_and_running =
            vec![replicas as f64 * plan.recommended_cpu_request; n];
        series.forecast_sum_mem_up_and_running =
            vec![replicas as f64 * plan.recommended_mem_request_and_limits_mi; n];
        series.scale_up_behaviour_to_x_times = vec![0.0; n];
        series.forecast_replicas_desired = vec![replicas; n];
        return Some(series);
    }

    let min_replicas = plan.recommended_min_replicas;
    let max_replicas = plan.recommended_max_replicas;
    let cpu_request = plan.recommended_cpu_request;
    let mem_request = plan.recommended_mem_request_and_limits_mi;
    let target_cpu = plan.recommended_hpa_target_cpu;
    let latency = plan.workload_e2e_startup_latency_rows;
    let steps = config.hpa_scale_down_behaviour_steps;

    let mut replicas = vec![0u32; n];
    let mut forecast_cpu = vec![0.0f64; n];
    let mut forecast_mem = vec![0.0f64; n];
    let mut metric_value = vec![0.0f64; n];
    let mut desired = vec![0u32; n];
    let mut cpu_clash_counter: u32 = 0;

    for i in 0..n {
        if cancel.is_cancelled() {
            rec.valid = false;
            rec.validation_msg = "Simulation cancelled.".to_string();
            return None;
        }

        if i < latency {
            replicas[i] = starting_replicas;
        } else {
            let reaction_index = i - latency;
            let replicas_up = desired[reaction_index];
            let lookback_start = reaction_index.saturating_sub(steps);
            let replicas_down = if lookback_start == 0 {
                min_replicas
            } else {
                desired[lookback_start..lookback_start + steps]
                    .iter()
                    .copied()
                    .max()
                    .unwrap_or(min_replicas)
                    .max(min_replicas)
            };
            replicas[i] = replicas_up
                .max(replicas_down)
                .clamp(min_replicas, max_replicas);
        }

        forecast_cpu[i] = replicas[i] as f64 * cpu_request;
        forecast_mem[i] = replicas[i] as f64 * mem_request;

        let cpu_usage = series.sum_containers_cpu_usage[i];
        let mem_usage = series.sum_containers_mem_usage_mi[i];

        if forecast_cpu[i] < cpu_usage {
            cpu_clash_counter += 1;
            if cpu_clash_counter > config.cpu_clash_count_threshold {
                rec.valid = false;
                rec.validation_msg = format!(
                    "Index: {} Clash exists. Forecast sum cpu: {:.3} is < sum cpu usage: {:.3}. \
                     This exceeds the cpu clash count threshold: {}",
                    i, forecast_cpu[i], cpu_usage, config.cpu_clash_count_threshold
                );
                return None;
            }
        }
        if forecast_mem[i] < mem_usage {
            rec.valid = false;
            rec.validation_msg = format!(
                "Index: {} Clash exists. Forecast sum mem: {:.3} is < sum mem usage: {:.3}",
                i, forecast_cpu[i], mem_usage
            );
            return None;
        }

        let metric = if cpu_request > 0.0 {
            round_half_up(cpu_usage / forecast_cpu[i], 2)
        } else {
            0.0
        };
        metric_value[i] = metric;

        desired[i] = if i < latency {
            starting_replicas
        } else {
            let scaled = (replicas[i] as f64 * (metric / target_cpu)).ceil() as u32;
            scaled.clamp(min_replicas, max_replicas)
        };
    }

    series.forecast_replicas_up_and_running = replicas;
    series.forecast_sum_cpu_up_and_running = forecast_cpu;
    series.forecast_sum_mem_up_and_running = forecast_mem;
    series.scale_up_behaviour_to_x_times = metric_value;
    series.forecast_replicas_desired = desired;
    Some(series)
}

/// Validate, simulate and score one plan.
pub fn process_plan(
    config: &RecommenderConfig,
    identity: &WorkloadIdentity,
    startup_budget: StartupBudget,
    plan: WorkloadPlan,
    trace: &WorkloadTrace,
    cancel: &CancellationToken,
) -> PlanOutcome {
    tracing::info!("Processing plan {} for {}", plan.method, identity);
    let mut rec = WorkloadRecommendation::new(identity.clone(), startup_budget, plan);

    if let Err(msg) = plan_validity_guard(config, &rec.plan) {
        tracing::info!("Invalid plan {}: {}", rec.plan.method, msg);
        rec.validation_msg = msg;
        return PlanOutcome {
            analysis: None,
            recommendation: rec,
        };
    }
    if trace.is_empty() {
        rec.validation_msg = "Workload dataframe is empty.".to_string();
        return PlanOutcome {
            analysis: None,
            recommendation: rec,
        };
    }
    rec.valid = true;

    let starting = starting_replicas(trace, &rec.plan);
    tracing::debug!("Starting replicas for {}: {}", rec.plan.method, starting);

    match simulate_plan(config, &mut rec, trace, starting, cancel) {
        None => {
            tracing::info!("Plan {} dropped: {}", rec.plan.method, rec.validation_msg);
            PlanOutcome {
                analysis: None,
                recommendation: rec,
            }
        },
        Some(mut series) => {
            calculate_savings(&mut series, config);
            rec.forecast_cpu_saving =
                round_half_up(mean(series.forecast_cpu_saving.iter().copied()), 3);
            rec.forecast_mem_saving_mi = mean(series.forecast_mem_saving_mi.iter().copied()).ceil();
            rec.scale_up_behaviour_to_x_times =
                nan_max(series.scale_up_behaviour_to_x_times.iter().copied());
            PlanOutcome {
                analysis: Some(series),
                recommendation: rec,
            }
        },
    }
}

/// Simulate every plan concurrently and select the best one.
///
/// Plans fan out over a worker pool bounded by the logical core count.
/// The trace is shared immutably; each worker returns owned forecast
/// buffers. Results are folded in plan order, so the winner is
/// deterministic and ties fall to the earlier plan in the documented
/// `(method, cpu, mem, max)` order.
pub async fn run_simulations(
    plans: Vec<WorkloadPlan>,
    identity: &WorkloadIdentity,
    startup_budget: &StartupBudget,
    trace: &WorkloadTrace,
    config: &RecommenderConfig,
    cancel: &CancellationToken,
) -> Result<SimulationBatch> {
    let mut reasons = ReasonMap::new();
    let workers = available_parallelism().map(|n| n.get()).unwrap_or(4);
    let semaphore = Arc::new(Semaphore::new(workers));
    let shared_trace = Arc::new(trace.clone());
    let shared_config = Arc::new(config.clone());

    let mut handles = Vec::with_capacity(plans.len());
    for plan in plans {
        let semaphore = semaphore.clone();
        let trace = shared_trace.clone();
        let config = shared_config.clone();
        let identity = identity.clone();
        let startup_budget = *startup_budget;
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("simulation worker pool closed")?;
            tokio::task::spawn_blocking(move || {
                process_plan(&config, &identity, startup_budget, plan, &trace, &cancel)
            })
            .await
            .context("simulation worker panicked")
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.context("simulation task aborted")??);
    }

    if cancel.is_cancelled() {
        reasons.insert("general".to_string(), "Simulation cancelled.".to_string());
        return Ok(SimulationBatch {
            reasons,
            ..SimulationBatch::default()
        });
    }

    let mut best_score = f64::NEG_INFINITY;
    let mut best: Option<WorkloadRecommendation> = None;
    let mut best_analysis: Option<AnalysisSeries> = None;
    let mut analyses = Vec::new();

    for outcome in outcomes {
        match outcome.analysis {
            None => {
                reasons.insert(
                    outcome.recommendation.plan.method.clone(),
                    outcome.recommendation.validation_msg.clone(),
                );
            },
            Some(series) => {
                let score = series.score();
                tracing::info!("Avg savings for {}: {:.2}", series.method, score);
                if score > best_score {
                    best_score = score;
                    best = Some(outcome.recommendation);
                    best_analysis = Some(series.clone());
                }
                analyses.push(series);
            },
        }
    }

    match (&mut best, &best_analysis) {
        (Some(rec), Some(series)) => {
            rec.analysis_period_start = series.window_begin.first().copied();
            rec.analysis_period_end = series.window_begin.last().copied();
            rec.observed_min_replicas = series
                .num_replicas_at_usage_window
                .iter()
                .copied()
                .min()
                .unwrap_or(0);
            rec.observed_max_replicas = series
                .num_replicas_at_usage_window
                .iter()
                .copied()
                .max()
                .unwrap_or(0);
        },
        _ => {
            tracing::info!("No valid analysis data found for {}", identity);
            reasons.insert(
                "general".to_string(),
                "No valid analysis data found.".to_string(),
            );
        },
    }

    Ok(SimulationBatch {
        best_analysis,
        best,
        reasons,
        analyses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_identity, trace_with_cpu_sums, valid_plan};

    fn budget() -> StartupBudget {
        StartupBudget {
            scheduled_to_ready_seconds: 0.0,
            hpa_processing_seconds: 30.0,
            cluster_autoscaler_seconds: 30.0,
        }
    }

    #[test]
    fn starting_replicas_cover_the_first_reaction_window() {
        let trace = trace_with_cpu_sums(&[0.3, 0.9, 0.3, 0.3]);
        let mut plan = valid_plan(0.1, 3, 20, 1.0);
        plan.workload_e2e_startup_latency_rows = 1;
        // Peak over the first two rows is 0.9 -> nine replicas of 0.1.
        assert_eq!(starting_replicas(&trace, &plan), 9);

        plan.recommended_max_replicas = 5;
        assert_eq!(starting_replicas(&trace, &plan), 5);
    }

    #[test]
    fn steady_load_scales_by_the_target_headroom() {
        let config = RecommenderConfig {
            hpa_scale_down_behaviour_steps: 2,
            ..RecommenderConfig::default()
        };
        let trace = trace_with_cpu_sums(&[0.3; 6]);
        let mut plan = valid_plan(0.1, 3, 20, 0.9);
        plan.workload_e2e_startup_latency_rows = 1;
        let mut rec = WorkloadRecommendation::new(test_identity(), budget(), plan);
        rec.valid = true;

        let series =
            simulate_plan(&config, &mut rec, &trace, 3, &CancellationToken::new()).unwrap();
        // One reaction later the target headroom asks for a fourth replica
        // (ceil(3 * 1.0 / 0.9)), and the fleet stays there.
        assert_eq!(series.forecast_replicas_up_and_running, vec![3, 3, 4, 4, 4, 4]);
        assert_eq!(series.forecast_replicas_desired, vec![3, 4, 4, 4, 4, 4]);
        assert_eq!(series.scale_up_behaviour_to_x_times[0], 1.0);
        assert_eq!(series.scale_up_behaviour_to_x_times[2], 0.75);
    }

    #[test]
    fn scale_down_waits_for_the_stabilization_window() {
        let config = RecommenderConfig {
            hpa_scale_down_behaviour_steps: 2,
            ..RecommenderConfig::default()
        };
        let trace = trace_with_cpu_sums(&[0.3, 0.9, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3]);
        let mut plan = valid_plan(0.1, 3, 20, 1.0);
        plan.workload_e2e_startup_latency_rows = 1;
        let mut rec = WorkloadRecommendation::new(test_identity(), budget(), plan);
        rec.valid = true;

        let series =
            simulate_plan(&config, &mut rec, &trace, 9, &CancellationToken::new()).unwrap();
        // The spike recommendation lingers in the look-back window and
        // pulls the fleet back up once at row 4 before the decay settles.
        assert_eq!(
            series.forecast_replicas_up_and_running,
            vec![9, 9, 9, 3, 9, 3, 3, 3]
        );
        assert!(rec.valid);
    }

    #[test]
    fn cpu_clash_beyond_threshold_invalidates_the_plan() {
        let config = RecommenderConfig::default();
        let trace = trace_with_cpu_sums(&[0.3, 2.0, 0.3]);
        let mut plan = valid_plan(0.1, 3, 4, 1.0);
        plan.workload_e2e_startup_latency_rows = 1;
        let mut rec = WorkloadRecommendation::new(test_identity(), budget(), plan);
        rec.valid = true;

        let series = simulate_plan(&config, &mut rec, &trace, 3, &CancellationToken::new());
        assert!(series.is_none());
        assert!(!rec.valid);
        assert!(rec.validation_msg.contains("sum cpu usage"));
    }

    #[test]
    fn memory_clash_is_never_tolerated() {
        let config = RecommenderConfig {
            cpu_clash_count_threshold: 1000,
            ..RecommenderConfig::default()
        };
        let mut rows = trace_with_cpu_sums(&[0.3, 0.3]).rows().to_vec();
        for row in &mut rows {
            row.max_containers_mem_usage_mi = 500.0;
        }
        let trace = WorkloadTrace::normalize(rows);
        let mut plan = valid_plan(0.1, 3, 4, 1.0);
        plan.workload_e2e_startup_latency_rows = 1;
        plan.recommended_mem_request_and_limits_mi = 10.0;
        let mut rec = WorkloadRecommendation::new(test_identity(), budget(), plan);
        rec.valid = true;

        let series = simulate_plan(&config, &mut rec, &trace, 3, &CancellationToken::new());
        assert!(series.is_none());
        assert!(rec.validation_msg.contains("sum mem usage"));
    }

    #[test]
    fn vpa_series_is_constant() {
        let config = RecommenderConfig::default();
        let trace = trace_with_cpu_sums(&[0.3, 0.5, 0.4]);
        let mut plan = valid_plan(0.2, 4, 4, 1.0);
        plan.method = "VPA".to_string();
        plan.recommended_mem_request_and_limits_mi = 100.0;
        let mut rec = WorkloadRecommendation::new(test_identity(), budget(), plan);
        rec.valid = true;

        let series =
            simulate_plan(&config, &mut rec, &trace, 4, &CancellationToken::new()).unwrap();
        assert_eq!(series.forecast_replicas_up_and_running, vec![4, 4, 4]);
        assert!(series
            .forecast_sum_cpu_up_and_running
            .iter()
            .all(|&v| (v - 0.8).abs() < 1e-12));
        assert!(series
            .forecast_sum_mem_up_and_running
            .iter()
            .all(|&v| (v - 400.0).abs() < 1e-12));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_discards_partial_results() {
        let config = RecommenderConfig::default();
        let trace = trace_with_cpu_sums(&[0.3; 16]);
        let mut plan = valid_plan(0.1, 3, 20, 0.9);
        plan.workload_e2e_startup_latency_rows = 1;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = run_simulations(
            vec![plan],
            &test_identity(),
            &budget(),
            &trace,
            &config,
            &cancel,
        )
        .await
        .unwrap();
        assert!(batch.best.is_none());
        assert!(batch.analyses.is_empty());
        assert_eq!(batch.reasons["general"], "Simulation cancelled.");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn equal_scores_fall_to_the_earlier_plan() {
        let config = RecommenderConfig::default();
        let trace = trace_with_cpu_sums(&[0.3; 6]);
        let mut first = valid_plan(0.1, 3, 20, 0.9);
        first.method = "DCR-10".to_string();
        first.workload_e2e_startup_latency_rows = 1;
        let mut second = first.clone();
        second.method = "DMR_mean-loop_3".to_string();

        let batch = run_simulations(
            vec![first, second],
            &test_identity(),
            &budget(),
            &trace,
            &config,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(batch.analyses.len(), 2);
        assert_eq!(batch.best.unwrap().plan.method, "DCR-10");
    }
}
