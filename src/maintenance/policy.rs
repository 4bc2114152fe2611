use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::oracle::{MaintenanceOracle, OracleRequest};
use crate::error::StageError;
use crate::state_machine::StageState;

/// Default probability above which the local policy asks for maintenance.
pub const DEFAULT_THRESHOLD: f64 = 0.15;

/// Decides, after each successful step, whether the stage needs maintenance.
#[derive(Clone)]
pub enum MaintenancePolicy {
    /// Maintain once the failure probability exceeds `threshold`.
    Threshold { threshold: f64 },
    /// Ask a remote oracle. Any oracle error means "no maintenance".
    Remote(Arc<dyn MaintenanceOracle>),
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        MaintenancePolicy::Threshold {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl fmt::Debug for MaintenancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenancePolicy::Threshold { threshold } => {
                f.debug_struct("Threshold").field("threshold", threshold).finish()
            }
            MaintenancePolicy::Remote(_) => f.write_str("Remote"),
        }
    }
}

impl MaintenancePolicy {
    pub async fn needs_maintenance(&self, stage_id: &str, state: &StageState) -> bool {
        match self {
            MaintenancePolicy::Threshold { threshold } => state.failure_probability() > *threshold,
            MaintenancePolicy::Remote(oracle) => {
                let req = OracleRequest {
                    stage_id: stage_id.to_string(),
                    runtime: state.runtime(),
                    failure_probability: state.failure_probability(),
                };
                match oracle.decide(&req).await {
                    Ok(decision) => {
                        debug!(stage = stage_id, decision, "oracle answered");
                        decision
                    }
                    Err(e) => {
                        let err = StageError::from(e);
                        warn!(
                            stage = stage_id,
                            class = %err.class(),
                            "{err}; skipping maintenance"
                        );
                        false
                    }
                }
            }
        }
    }
}
