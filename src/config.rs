//! Line configuration loaded from `prodline.toml`.
//!
//! [`LineConfig`] describes the connections, the wear model and every stage
//! of the line. Values missing from the file use the defaults below.
//! Connection settings from the environment (`REDIS_URL`, `INFLUXDB_URL`,
//! `INFLUXDB_TOKEN`, `INFLUXDB_ORG`) take precedence over the file.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::maintenance::{DEFAULT_ORACLE_TIMEOUT, DEFAULT_THRESHOLD};
use crate::state_machine::StageRole;
use crate::telemetry::influx::InfluxTarget;
use crate::wear::{DEFAULT_TAU, StageTimings, WearModel};

pub const DEFAULT_CONFIG_PATH: &str = "prodline.toml";

/// Line-wide settings and the `[[stages]]` list from `prodline.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct LineConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Divides every simulated duration to get the wall-clock sleep.
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Time constant of the hazard curve in simulated seconds.
    #[serde(default = "default_tau")]
    pub tau: f64,

    #[serde(default = "default_threshold")]
    pub maintenance_threshold: f64,

    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,

    #[serde(default)]
    pub timings: StageTimings,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    #[default]
    Log,
    Influx,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub kind: TelemetryKind,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_item_bucket")]
    pub item_bucket: String,
}

/// One `[[stages]]` entry as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct StageSpec {
    pub name: String,
    /// Parsed during validation so unknown roles surface as [`ConfigError`].
    pub role: String,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub oracle_url: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
}

/// Fully validated, immutable configuration of one stage actor.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub name: String,
    pub role: StageRole,
    pub next: Option<String>,
    pub oracle_url: Option<String>,
    pub oracle_timeout: Duration,
    pub speed: f64,
    pub timings: StageTimings,
    pub wear: WearModel,
    pub maintenance_threshold: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

/// Local redis on the default port.
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Five simulated seconds per wall-clock second.
fn default_speed() -> f64 {
    5.0
}

/// Time constant of the hazard curve, in simulated seconds.
fn default_tau() -> f64 {
    DEFAULT_TAU
}

/// Failure probability at which the local policy asks for maintenance.
fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Oracle calls give up after this long and count as "no maintenance".
fn default_oracle_timeout_ms() -> u64 {
    DEFAULT_ORACLE_TIMEOUT.as_millis() as u64
}

/// InfluxDB bucket for item events.
fn default_item_bucket() -> String {
    "process".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            kind: TelemetryKind::default(),
            url: String::new(),
            org: String::new(),
            token: String::new(),
            item_bucket: default_item_bucket(),
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            speed: default_speed(),
            tau: default_tau(),
            maintenance_threshold: default_threshold(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            timings: StageTimings::default(),
            telemetry: TelemetryConfig::default(),
            stages: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn influx_target(&self) -> Result<InfluxTarget, ConfigError> {
        if self.url.is_empty() || self.org.is_empty() || self.token.is_empty() {
            return Err(ConfigError::IncompleteTelemetry("influx".into()));
        }
        Ok(InfluxTarget {
            url: self.url.clone(),
            org: self.org.clone(),
            token: self.token.clone(),
            item_bucket: self.item_bucket.clone(),
            status_suffix: "_status".into(),
        })
    }
}

impl LineConfig {
    /// Loads `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<LineConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overrides connection settings from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(url) = get("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(url) = get("INFLUXDB_URL") {
            self.telemetry.url = url;
        }
        if let Some(token) = get("INFLUXDB_TOKEN") {
            self.telemetry.token = token;
        }
        if let Some(org) = get("INFLUXDB_ORG") {
            self.telemetry.org = org;
        }
    }

    /// Resolves one stage spec against the line-wide settings.
    pub fn stage_config(&self, spec: &StageSpec) -> Result<StageConfig, ConfigError> {
        let role: StageRole = spec.role.parse()?;
        match (&spec.next, role) {
            (None, StageRole::Producer | StageRole::Relay) => {
                return Err(ConfigError::MissingNext {
                    stage: spec.name.clone(),
                    role: role.to_string(),
                });
            }
            (Some(next), StageRole::Consumer) => {
                return Err(ConfigError::UnexpectedNext {
                    stage: spec.name.clone(),
                    next: next.clone(),
                });
            }
            _ => {}
        }

        let speed = spec.speed.unwrap_or(self.speed);
        if speed.is_nan() || speed <= 0.0 || speed.is_infinite() {
            return Err(ConfigError::InvalidSpeed(speed));
        }
        if !(0.0..=1.0).contains(&self.maintenance_threshold) {
            return Err(ConfigError::InvalidWear(format!(
                "maintenance_threshold must be within [0, 1], got {}",
                self.maintenance_threshold
            )));
        }
        self.timings.validate()?;

        Ok(StageConfig {
            name: spec.name.clone(),
            role,
            next: spec.next.clone(),
            oracle_url: spec.oracle_url.clone(),
            oracle_timeout: Duration::from_millis(self.oracle_timeout_ms),
            speed,
            timings: self.timings,
            wear: WearModel::new(self.tau)?,
            maintenance_threshold: self.maintenance_threshold,
            seed: None,
        })
    }

    /// Validates every `[[stages]]` entry.
    pub fn stage_configs(&self) -> Result<Vec<StageConfig>, ConfigError> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .map(|spec| {
                if !seen.insert(spec.name.as_str()) {
                    return Err(ConfigError::DuplicateStage(spec.name.clone()));
                }
                self.stage_config(spec)
            })
            .collect()
    }

    /// Every queue of the line: one per stage with an inbound side.
    pub fn queue_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| {
                s.role
                    .parse::<StageRole>()
                    .map(StageRole::has_inbound)
                    .unwrap_or(false)
            })
            .map(|s| s.name.clone())
            .collect()
    }
}
