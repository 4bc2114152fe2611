//! Wear and failure model plus the duration distributions of a stage.
//!
//! Runtime accumulates in simulated seconds. The speed factor only divides
//! the wall-clock sleep, so the hazard curve is the same at every speed.

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default time constant of the hazard curve, in simulated seconds.
pub const DEFAULT_TAU: f64 = 120.0;

/// `p = 1 - exp(-runtime / tau)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WearModel {
    tau: f64,
}

impl Default for WearModel {
    fn default() -> Self {
        Self { tau: DEFAULT_TAU }
    }
}

impl WearModel {
    /// `tau` must be positive. Infinity disables failures.
    pub fn new(tau: f64) -> Result<Self, ConfigError> {
        if tau.is_nan() || tau <= 0.0 {
            return Err(ConfigError::InvalidWear(format!(
                "tau must be positive, got {tau}"
            )));
        }
        Ok(Self { tau })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn failure_probability(&self, runtime: f64) -> f64 {
        let runtime = runtime.max(0.0);
        1.0 - (-runtime / self.tau).exp()
    }

    /// One Bernoulli trial: true iff a uniform draw in [0, 1) is below `p`.
    pub fn should_fail<R: Rng + ?Sized>(&self, p: f64, rng: &mut R) -> bool {
        rng.r#gen::<f64>() < p
    }
}

/// A clamped Gaussian: `max(Normal(mean, std_dev), floor)` simulated seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationSpec {
    pub mean: f64,
    pub std_dev: f64,
    pub floor: f64,
}

impl DurationSpec {
    pub const fn new(mean: f64, std_dev: f64, floor: f64) -> Self {
        Self {
            mean,
            std_dev,
            floor,
        }
    }

    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDistribution { name, reason };
        if !self.mean.is_finite() {
            return Err(invalid(format!("mean must be finite, got {}", self.mean)));
        }
        if !self.std_dev.is_finite() || self.std_dev < 0.0 {
            return Err(invalid(format!(
                "std_dev must be finite and non-negative, got {}",
                self.std_dev
            )));
        }
        if !self.floor.is_finite() || self.floor < 0.0 {
            return Err(invalid(format!(
                "floor must be finite and non-negative, got {}",
                self.floor
            )));
        }
        Ok(())
    }

    /// Draws one duration in simulated seconds.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let raw = match Normal::new(self.mean, self.std_dev) {
            Ok(normal) => normal.sample(rng),
            Err(_) => self.mean,
        };
        raw.max(self.floor)
    }
}

/// The three duration distributions of a stage. Fields left out of a
/// `[timings.*]` table keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "TimingsFile")]
pub struct StageTimings {
    pub step: DurationSpec,
    pub maintenance: DurationSpec,
    pub repair: DurationSpec,
}

impl Default for StageTimings {
    fn default() -> Self {
        Self {
            step: DurationSpec::new(10.0, 2.0, 5.0),
            maintenance: DurationSpec::new(100.0, 5.0, 10.0),
            repair: DurationSpec::new(60.0, 10.0, 45.0),
        }
    }
}

/// One `[timings.*]` table as written.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct PartialDuration {
    mean: Option<f64>,
    std_dev: Option<f64>,
    floor: Option<f64>,
}

impl PartialDuration {
    fn over(self, base: DurationSpec) -> DurationSpec {
        DurationSpec {
            mean: self.mean.unwrap_or(base.mean),
            std_dev: self.std_dev.unwrap_or(base.std_dev),
            floor: self.floor.unwrap_or(base.floor),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimingsFile {
    step: PartialDuration,
    maintenance: PartialDuration,
    repair: PartialDuration,
}

impl From<TimingsFile> for StageTimings {
    fn from(file: TimingsFile) -> Self {
        let defaults = StageTimings::default();
        Self {
            step: file.step.over(defaults.step),
            maintenance: file.maintenance.over(defaults.maintenance),
            repair: file.repair.over(defaults.repair),
        }
    }
}

impl StageTimings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.step.validate("step")?;
        self.maintenance.validate("maintenance")?;
        self.repair.validate("repair")
    }
}

/// Converts simulated seconds into a wall-clock sleep under `speed`.
/// Quotients too large for a `Duration` saturate to `Duration::MAX`.
pub fn wall_clock(simulated_secs: f64, speed: f64) -> Duration {
    Duration::try_from_secs_f64((simulated_secs / speed).max(0.0)).unwrap_or(Duration::MAX)
}
