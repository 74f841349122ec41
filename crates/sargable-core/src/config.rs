//! Configuration knobs for sargable planning.

use crate::error::PlanningError;
use serde::{Deserialize, Serialize};

/// Configuration for one planner instance.
///
/// `fast_null_handling` is a storage capability: when the storage layer can tell null
/// and missing apart without extra filtering, output-bound requirements whose interval
/// may contain null are still indexable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub fast_null_handling: bool,
    /// Produce only the full-scan alternative.
    pub disable_indexes: bool,
    /// Omit the full-scan alternative.
    pub disable_scan: bool,
    /// Upper bound on the index candidates returned per scan.
    pub max_index_candidates: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fast_null_handling: false,
            disable_indexes: false,
            disable_scan: false,
            max_index_candidates: 64,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.disable_indexes && self.disable_scan {
            return Err(PlanningError::InvalidConfig(
                "disable_indexes and disable_scan leave no access path".into(),
            ));
        }
        if self.max_index_candidates == 0 {
            return Err(PlanningError::InvalidConfig("max_index_candidates must be positive".into()));
        }
        Ok(())
    }
}
