//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Shardmap: failure-domain-aware partition placement for sharded clusters.
#[derive(Parser)]
#[command(name = "shardmap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the cluster configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text, json).
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Compute the topology of a fresh cluster from the configuration.
    Build(BuildArgs),
    /// Place the configured hosts into an existing topology.
    AddHosts(AddHostsArgs),
    /// Remove hosts and their partitions from a topology.
    RemoveHosts(RemoveHostsArgs),
    /// Let a rejoining host take over a missing host's partitions.
    Recover(RecoverArgs),
    /// Restore the partition layout hosts held before a full restart.
    Restore(RestoreArgs),
    /// Check a topology's layout against the live hosts.
    Validate(ValidateArgs),
    /// List protection groups.
    Groups(TopologyArgs),
    /// Show which partition and leader serve a key.
    Route(RouteArgs),
    /// Print version information.
    Version,
}

/// Arguments shared by commands that read a topology.
#[derive(Args)]
pub struct TopologyArgs {
    /// Topology JSON document to read.
    #[arg(short, long)]
    pub topology: PathBuf,
}

/// Arguments for the build command.
#[derive(Args)]
pub struct BuildArgs {
    /// Write the resulting topology to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the add-hosts command.
#[derive(Args)]
pub struct AddHostsArgs {
    #[command(flatten)]
    pub input: TopologyArgs,

    /// Write the resulting topology to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the remove-hosts command.
#[derive(Args)]
pub struct RemoveHostsArgs {
    #[command(flatten)]
    pub input: TopologyArgs,

    /// Host ids to remove.
    #[arg(long, value_delimiter = ',', required = true)]
    pub hosts: Vec<u32>,

    /// Write the resulting topology to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the recover command.
#[derive(Args)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub input: TopologyArgs,

    /// Hosts currently up.
    #[arg(long, value_delimiter = ',')]
    pub live: Vec<u32>,

    /// Id of the rejoining host.
    #[arg(long)]
    pub local_host: u32,

    /// Placement group of the rejoining host.
    #[arg(long)]
    pub placement_group: String,

    /// Partition ids the rejoining host held before it failed.
    #[arg(long, value_delimiter = ',')]
    pub partitions: Option<Vec<u32>>,

    /// Write the resulting topology to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the restore command.
#[derive(Args)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub input: TopologyArgs,

    /// Write the resulting topology to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub input: TopologyArgs,

    /// Hosts currently up (defaults to every host not marked missing).
    #[arg(long, value_delimiter = ',')]
    pub live: Option<Vec<u32>>,
}

/// Arguments for the route command.
#[derive(Args)]
pub struct RouteArgs {
    #[command(flatten)]
    pub input: TopologyArgs,

    /// Key to route.
    #[arg(short, long)]
    pub key: String,
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
