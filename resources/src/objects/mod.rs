pub mod analysis;
pub mod plan;
pub mod trace;
pub mod workload;

pub use analysis::AnalysisSeries;
pub use plan::{WorkloadPlan, WorkloadRecommendation};
pub use trace::{TraceRow, WorkloadTrace};
pub use workload::{StartupBudget, WorkloadIdentity};

use std::collections::BTreeMap;

/// Rejection reasons keyed by plan method (or `"general"` for failures
/// that precede plan generation).
pub type ReasonMap = BTreeMap<String, String>;
