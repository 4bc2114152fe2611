//! When a stage gets maintained: local threshold, remote oracle, or an
//! out-of-band request on the stage's signal channel.

pub mod oracle;
mod policy;
mod signal;

pub use oracle::{DEFAULT_ORACLE_TIMEOUT, HttpOracle};
pub use policy::{DEFAULT_THRESHOLD, MaintenancePolicy};
pub use signal::{MaintenanceFlag, spawn_listener};
