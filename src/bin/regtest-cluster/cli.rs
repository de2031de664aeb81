//! CLI definition for regtest-cluster.

use clap::Parser;
use std::path::PathBuf;

/// Local regtest cluster runner.
#[derive(Parser, Debug)]
#[command(name = "regtest-cluster")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Node count to spawn.
    #[arg(long, default_value_t = 3)]
    pub nodes: usize,

    /// Node binary (overrides NODE_BINARY and the config file).
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// TOML harness configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data directory for node state.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Keep the data directory on shutdown.
    #[arg(long)]
    pub keep_data: bool,

    /// Index of a node to run pruned (repeatable).
    #[arg(long = "prune")]
    pub prune: Vec<usize>,

    /// Prune target passed to pruned nodes.
    #[arg(long, default_value_t = 550)]
    pub prune_target: u64,

    /// Extra argument passed to every node (repeatable).
    #[arg(long = "node-arg", allow_hyphen_values = true)]
    pub node_args: Vec<String>,

    /// Blocks to mine on node 0 once the cluster is up.
    #[arg(long, default_value_t = 0)]
    pub generate: u32,

    /// Path to write a cluster manifest JSON.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Log level for the runner (defaults to the config file's `log_level`).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Options for node `index`.
    pub fn node_options(&self, index: usize) -> Vec<String> {
        let mut options = self.node_args.clone();
        if self.prune.contains(&index) {
            options.push(format!("-prune={}", self.prune_target));
        }
        options
    }

    /// Log level to use when `RUST_LOG` is unset.
    pub fn log_level<'a>(&'a self, config_level: &'a str) -> &'a str {
        self.log_level.as_deref().unwrap_or(config_level)
    }
}
