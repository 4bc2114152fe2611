use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::Phase;
use crate::error::ConfigError;
use crate::wear::WearModel;

/// Position of a stage in the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    /// Generates items, no inbound queue.
    Producer,
    /// Receives, processes and forwards items.
    Relay,
    /// Receives and processes items, terminal.
    Consumer,
}

impl StageRole {
    /// The phase a stage rests in between cycles.
    pub fn resting_phase(self) -> Phase {
        match self {
            StageRole::Producer => Phase::Idle,
            StageRole::Relay | StageRole::Consumer => Phase::AwaitItem,
        }
    }

    pub fn has_inbound(self) -> bool {
        !matches!(self, StageRole::Producer)
    }

    pub fn has_outbound(self) -> bool {
        !matches!(self, StageRole::Consumer)
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRole::Producer => write!(f, "producer"),
            StageRole::Relay => write!(f, "relay"),
            StageRole::Consumer => write!(f, "consumer"),
        }
    }
}

impl FromStr for StageRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "producer" => Ok(StageRole::Producer),
            "relay" => Ok(StageRole::Relay),
            "consumer" => Ok(StageRole::Consumer),
            _ => Err(ConfigError::UnknownRole(s.to_string())),
        }
    }
}

/// Wear state of one stage.
///
/// `failure_probability` is always derived from `runtime`; both are only
/// ever reset together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageState {
    runtime: f64,
    failure_probability: f64,
    broken: bool,
}

impl StageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated seconds of active processing since the last reset.
    pub fn runtime(&self) -> f64 {
        self.runtime
    }

    pub fn failure_probability(&self) -> f64 {
        self.failure_probability
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Adds one step's simulated duration and recomputes the probability.
    pub fn accumulate(&mut self, simulated_secs: f64, model: &WearModel) {
        self.runtime += simulated_secs.max(0.0);
        self.failure_probability = model.failure_probability(self.runtime);
    }

    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Repair or maintenance completion.
    pub fn reset(&mut self) {
        self.runtime = 0.0;
        self.failure_probability = 0.0;
        self.broken = false;
    }
}
