//! Clients the recommender core treats as external collaborators: the
//! telemetry fetcher, the pod startup-time probe and the warehouse sink.
//! All I/O lives here; the core itself never issues a request.

pub mod startup;
pub mod telemetry;
pub mod warehouse;

/// User agent attached to every outbound request.
pub const USER_AGENT: &str = "hpa-config-recommender/0.1";
