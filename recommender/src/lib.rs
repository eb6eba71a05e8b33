//! Autoscaling configuration recommender.
//!
//! Given a normalized usage trace for one workload, generate candidate
//! HPA plans, replay the trace against each plan's scaling policy, and
//! pick the plan with the highest forecast CPU-equivalent savings. A
//! static VPA fallback is always in the running.

use anyhow::Result;
use resources::{
    config::RecommenderConfig,
    objects::{
        AnalysisSeries, ReasonMap, StartupBudget, WorkloadIdentity, WorkloadRecommendation,
        WorkloadTrace,
    },
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub mod capacity;
pub mod plan;
pub mod savings;
pub mod simulate;
pub mod slope;
pub mod validate;

pub use plan::build_plans;
pub use simulate::{run_simulations, SimulationBatch};

/// Everything a driver needs from one recommendation run.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RecommendationOutcome {
    /// Analysis series of the winning plan.
    pub best_analysis: Option<AnalysisSeries>,
    /// The winning recommendation, absent when every plan was rejected.
    pub best: Option<WorkloadRecommendation>,
    /// Rejection reason per discarded plan method.
    pub reasons: ReasonMap,
    /// Analysis series of every plan that survived simulation.
    pub analyses: Vec<AnalysisSeries>,
}

/// Plan and simulate in one call: the whole pipeline behind the CLI.
pub async fn recommend(
    identity: &WorkloadIdentity,
    startup_budget: &StartupBudget,
    trace: &WorkloadTrace,
    config: &RecommenderConfig,
    cancel: &CancellationToken,
) -> Result<RecommendationOutcome> {
    let (plans, mut reasons) = build_plans(identity, startup_budget, trace, config)?;
    if plans.is_empty() {
        tracing::info!("No plans exist for workload {}", identity);
        return Ok(RecommendationOutcome {
            reasons,
            ..RecommendationOutcome::default()
        });
    }

    let batch = run_simulations(plans, identity, startup_budget, trace, config, cancel).await?;
    reasons.extend(batch.reasons);
    Ok(RecommendationOutcome {
        best_analysis: batch.best_analysis,
        best: batch.best,
        reasons,
        analyses: batch.analyses,
    })
}


#[cfg(test)]
mod tests {
    use resources::objects::StartupBudget;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::testutil::{steady_trace, test_identity, trace_from};

    fn budget_of_two_rows() -> StartupBudget {
        StartupBudget {
            scheduled_to_ready_seconds: 20.0,
            hpa_processing_seconds: 45.0,
            cluster_autoscaler_seconds: 55.0,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn static_fallback_wins_when_memory_rules_out_scaling() {
        let config = RecommenderConfig::default();
        let trace = steady_trace(4, 4, 0.1);

        let outcome = recommend(
            &test_identity(),
            &budget_of_two_rows(),
            &trace,
            &config,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // Every horizontal plan under-provisions memory at its starting
        // replica count; the static plan carries the fleet.
        let best = outcome.best.unwrap();
        assert_eq!(best.plan.method, "VPA");
        assert!(best.valid);
        assert!((best.plan.recommended_cpu_request - 0.105).abs() < 1e-12);
        assert!((best.forecast_cpu_saving - 1.58).abs() < 1e-12);
        assert_eq!(best.forecast_mem_saving_mi, 520.0);
        assert_eq!(best.observed_min_replicas, 4);
        assert_eq!(best.observed_max_replicas, 4);
        assert!(best.analysis_period_start.is_some());

        assert_eq!(outcome.analyses.len(), 1);
        for method in ["DCR-10", "DMR_mean-loop_3", "DMR_mean-loop_4"] {
            assert!(outcome.reasons[method].contains("Clash exists"));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reruns_are_deterministic() {
        let config = RecommenderConfig::default();
        let trace = steady_trace(6, 4, 0.1);
        let cancel = CancellationToken::new();

        let first = recommend(&test_identity(), &budget_of_two_rows(), &trace, &config, &cancel)
            .await
            .unwrap();
        let second = recommend(&test_identity(), &budget_of_two_rows(), &trace, &config, &cancel)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_trace_short_circuits() {
        let config = RecommenderConfig::default();
        let outcome = recommend(
            &test_identity(),
            &budget_of_two_rows(),
            &trace_from(vec![]),
            &config,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.best.is_none());
        assert!(outcome.analyses.is_empty());
        assert_eq!(outcome.reasons["general"], "Workload dataframe is empty.");
    }
}
