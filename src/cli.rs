//! Command line interface built on clap.
//!
//! [`Cli`] carries the subcommands ([`Command`]: stage, line, monitor,
//! maintain) and the global flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{DEFAULT_CONFIG_PATH, StageSpec};
use crate::state_machine::StageRole;

/// Production line simulator: stage actors with wear, failures and
/// maintenance, connected by queues.
#[derive(Debug, Parser)]
#[command(name = "prodline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Line configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Debug logging unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Stage role as accepted on the command line, mapped to [`StageRole`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    /// Generates items.
    Producer,
    /// Receives, processes and forwards items.
    Relay,
    /// Receives and processes items, forwards nothing.
    Consumer,
}

impl From<RoleArg> for StageRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Producer => StageRole::Producer,
            RoleArg::Relay => StageRole::Relay,
            RoleArg::Consumer => StageRole::Consumer,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs a single stage against Redis.
    Stage {
        #[arg(long, value_enum)]
        role: RoleArg,

        /// Stage name; also the name of its inbound queue.
        #[arg(long)]
        name: String,

        /// Downstream stage. Required for producers and relays.
        #[arg(long)]
        next: Option<String>,

        /// Maintenance oracle endpoint. Without it the local threshold
        /// policy is used.
        #[arg(long)]
        oracle_url: Option<String>,

        /// Simulation speed divisor, overriding the config.
        #[arg(long)]
        speed: Option<f64>,
    },

    /// Runs every configured stage in this process.
    Line {
        /// Use in-process queues instead of Redis.
        #[arg(long, default_value_t = false)]
        local: bool,
    },

    /// Shows the length of every stage queue.
    Monitor {
        /// Seconds between polls.
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
    },

    /// Asks a stage to run maintenance at its next checkpoint.
    Maintain {
        /// Stage name.
        stage: String,
    },
}

impl Command {
    /// The stage entry described by `stage` arguments.
    pub fn stage_spec(&self) -> Option<StageSpec> {
        match self {
            Command::Stage {
                role,
                name,
                next,
                oracle_url,
                speed,
            } => Some(StageSpec {
                name: name.clone(),
                role: StageRole::from(*role).to_string(),
                next: next.clone(),
                oracle_url: oracle_url.clone(),
                speed: *speed,
            }),
            _ => None,
        }
    }
}
