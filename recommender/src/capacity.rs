use resources::{config::RecommenderConfig, objects::WorkloadTrace};

/// Whether the workload's CPU request trails its observed usage.
///
/// True when the latest per-replica request sits below the configured
/// percentile of per-replica usage, meaning the request can no longer be
/// trusted as a capacity signal.
pub fn is_cpu_under_provisioned(config: &RecommenderConfig, trace: &WorkloadTrace) -> bool {
    let max_cpu_request = trace.max_of(|row| row.avg_container_cpu_request);
    let usage_percentile = trace.quantile_of(
        |row| row.avg_container_cpu_usage,
        config.underprovisioned_cpu_usage_threshold,
    );
    max_cpu_request < usage_percentile
}

/// Total CPU the workload must be able to serve at peak, in cores.
///
/// Under-provisioned workloads are sized from buffered peak usage, healthy
/// ones from peak requested capacity. A zero result means no horizontal
/// plan can be generated.
pub fn recommended_max_cpu_capacity(config: &RecommenderConfig, trace: &WorkloadTrace) -> f64 {
    let base = if is_cpu_under_provisioned(config, trace) {
        tracing::info!("The CPU is under-provisioned");
        trace.max_of(|row| row.sum_containers_cpu_usage)
            * config.extra_hpa_buffer_for_cpu_usage_capacity
    } else {
        tracing::info!("The CPU is not under-provisioned");
        trace.max_of(|row| row.sum_containers_cpu_request)
    };
    tracing::info!("Max CPU capacity {:.3}", base);
    base * config.extra_hpa_buffer_for_max_replicas
}

#[cfg(test)]
mod tests {
    use resources::objects::TraceRow;

    use super::*;
    use crate::testutil::{minutes_after_epoch, trace_from};

    fn row(minute: u32, usage: f64, request: f64) -> TraceRow {
        TraceRow {
            window_begin: minutes_after_epoch(minute),
            num_replicas_at_usage_window: 2,
            avg_container_cpu_usage: usage,
            stddev_containers_cpu_usage: 0.0,
            avg_container_cpu_request: request,
            avg_container_mem_usage_mi: 10.0,
            max_containers_mem_usage_mi: 10.0,
            avg_container_mem_request_mi: 20.0,
            sum_containers_cpu_request: 0.0,
            sum_containers_cpu_usage: 0.0,
            sum_containers_mem_request_mi: 0.0,
            sum_containers_mem_usage_mi: 0.0,
        }
    }

    #[test]
    fn under_provisioned_exactly_when_request_trails_usage_percentile() {
        let config = RecommenderConfig::default();
        // Constant usage 0.4; the 90th percentile is 0.4.
        let healthy = trace_from((0..5).map(|m| row(m, 0.4, 0.4)).collect());
        assert!(!is_cpu_under_provisioned(&config, &healthy));

        let starved = trace_from((0..5).map(|m| row(m, 0.4, 0.39)).collect());
        assert!(is_cpu_under_provisioned(&config, &starved));
    }

    #[test]
    fn capacity_uses_requests_when_healthy() {
        let config = RecommenderConfig::default();
        let trace = trace_from((0..5).map(|m| row(m, 0.2, 0.5)).collect());
        // Peak sum of requests: 0.5 * 2 replicas.
        assert!((recommended_max_cpu_capacity(&config, &trace) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn capacity_buffers_usage_when_starved() {
        let config = RecommenderConfig::default();
        let trace = trace_from((0..5).map(|m| row(m, 0.5, 0.1)).collect());
        // Peak sum of usage 1.0, buffered by 1.05.
        assert!((recommended_max_cpu_capacity(&config, &trace) - 1.05).abs() < 1e-12);
    }
}
