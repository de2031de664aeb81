//! Configuration for regtest-harness.

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the node binary under test.
pub const NODE_BINARY_ENV: &str = "NODE_BINARY";

/// Arguments passed to every node ahead of the caller's options.
pub const DEFAULT_NODE_ARGS: [&str; 4] = ["-server", "-keypool=1", "-discover=0", "-rest"];

/// Harness configuration.
///
/// Each default configuration gets its own data root and port seed so that
/// independent clusters can run side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Path to the node binary.
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Root directory holding one data directory per node.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// First port of the allocation window.
    #[serde(default = "default_port_base")]
    pub port_base: u16,

    /// Width of the P2P port window; RPC ports sit one window above.
    #[serde(default = "default_port_range")]
    pub port_range: u16,

    /// Per-run seed that shifts the port window (default: process id).
    #[serde(default = "default_port_seed")]
    pub port_seed: u32,

    /// RPC user written to each node's configuration file.
    #[serde(default = "default_rpc_credential")]
    pub rpc_user: String,

    /// RPC password written to each node's configuration file.
    #[serde(default = "default_rpc_credential")]
    pub rpc_password: String,

    /// Name of the node configuration file inside its data directory.
    #[serde(default = "default_conf_file_name")]
    pub conf_file_name: String,

    /// Arguments passed to every node before its own options.
    #[serde(default = "default_node_args")]
    pub default_args: Vec<String>,

    /// Seconds to wait for a node's RPC endpoint to become ready.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Seconds to wait for node processes to exit after `stop`.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Seconds a convergence barrier waits by default.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,

    /// Barrier and readiness polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-request RPC timeout in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Inherit node stdout/stderr instead of discarding it.
    #[serde(default)]
    pub enable_node_logging: bool,

    /// Remove the data root on teardown.
    #[serde(default = "default_cleanup")]
    pub cleanup_data_dir: bool,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            data_root: default_data_root(),
            port_base: default_port_base(),
            port_range: default_port_range(),
            port_seed: default_port_seed(),
            rpc_user: default_rpc_credential(),
            rpc_password: default_rpc_credential(),
            conf_file_name: default_conf_file_name(),
            default_args: default_node_args(),
            startup_timeout_secs: default_startup_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            sync_timeout_secs: default_sync_timeout(),
            poll_interval_ms: default_poll_interval(),
            rpc_timeout_secs: default_rpc_timeout(),
            enable_node_logging: false,
            cleanup_data_dir: default_cleanup(),
            log_level: default_log_level(),
        }
    }
}

impl HarnessConfig {
    /// Default configuration with the node binary taken from `NODE_BINARY`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(binary) = std::env::var_os(NODE_BINARY_ENV) {
            config.binary = PathBuf::from(binary);
        }
        config
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject layouts that cannot host a full cluster.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the port window overflows or any timeout is zero.
    pub fn validate(&self) -> Result<()> {
        let top = u32::from(self.port_base) + 2 * u32::from(self.port_range);
        if top > u32::from(u16::MAX) {
            return Err(Error::Config(format!(
                "port window overflow: base {} + 2 * range {} exceeds u16::MAX",
                self.port_base, self.port_range
            )));
        }
        if usize::from(self.port_range) <= crate::datadir::MAX_NODES + 1 {
            return Err(Error::Config(format!(
                "port range {} too small for {} nodes",
                self.port_range,
                crate::datadir::MAX_NODES
            )));
        }
        if self.startup_timeout_secs == 0
            || self.shutdown_timeout_secs == 0
            || self.sync_timeout_secs == 0
            || self.rpc_timeout_secs == 0
            || self.poll_interval_ms == 0
        {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Startup readiness timeout.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Process exit timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Default barrier timeout.
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    /// Polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-request RPC timeout.
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("bitcoind")
}

fn default_data_root() -> PathBuf {
    let suffix: u64 = rand::thread_rng().gen();
    std::env::temp_dir().join(format!("regtest_harness_{suffix:x}"))
}

const fn default_port_base() -> u16 {
    11_000
}

const fn default_port_range() -> u16 {
    5_000
}

fn default_port_seed() -> u32 {
    std::process::id()
}

fn default_rpc_credential() -> String {
    "rt".to_string()
}

fn default_conf_file_name() -> String {
    "bitcoin.conf".to_string()
}

fn default_node_args() -> Vec<String> {
    DEFAULT_NODE_ARGS.iter().map(ToString::to_string).collect()
}

const fn default_startup_timeout() -> u64 {
    60
}

const fn default_shutdown_timeout() -> u64 {
    60
}

const fn default_sync_timeout() -> u64 {
    60
}

const fn default_poll_interval() -> u64 {
    250
}

const fn default_rpc_timeout() -> u64 {
    30
}

const fn default_cleanup() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
