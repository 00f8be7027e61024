//! Command-line surface (spec AMBIENT STACK A.5): a `--config` path with
//! an optional `--self-id` override, plus a `default-config` subcommand
//! for dumping `SwarmVioConfig::default()` as TOML.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "swarmvio", author, version, about = "distributed swarm-aware visual-inertial state estimator")]
pub struct Cli {
    /// Path to the agent's TOML configuration file.
    #[arg(long, default_value = "swarmvio.toml")]
    pub config: String,

    /// Overrides `self_id` from the config file.
    #[arg(long)]
    pub self_id: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the default configuration in TOML format and exit.
    DefaultConfig,
}
