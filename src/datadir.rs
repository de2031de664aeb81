//! Per-node data directories and deterministic port layout.
//!
//! Every node index maps to its own directory under the data root and to a
//! P2P/RPC port pair. Ports are shifted by a per-run seed so that clusters
//! started by different processes do not collide.

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Largest cluster the port layout reserves room for.
pub const MAX_NODES: usize = 10;

/// Port pair assignment derived from a [`HarnessConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    base: u16,
    range: u16,
    seed: u32,
}

impl PortLayout {
    /// Build the layout from the harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            base: config.port_base,
            range: config.port_range,
            seed: config.port_seed,
        }
    }

    fn offset(&self, index: usize) -> Result<u16> {
        if index >= MAX_NODES {
            return Err(Error::Config(format!(
                "node index {index} exceeds MAX_NODES {MAX_NODES}"
            )));
        }
        let window = u64::from(self.range).saturating_sub(1 + MAX_NODES as u64).max(1);
        let shift = (MAX_NODES as u64 * u64::from(self.seed)) % window;
        u16::try_from(index as u64 + shift)
            .map_err(|_| Error::Config(format!("port offset for node {index} overflows")))
    }

    /// P2P listen port for a node.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `index >= MAX_NODES` or the port overflows.
    pub fn p2p_port(&self, index: usize) -> Result<u16> {
        let offset = self.offset(index)?;
        self.base
            .checked_add(offset)
            .ok_or_else(|| Error::Config(format!("p2p port for node {index} overflows")))
    }

    /// RPC port for a node, one window above its P2P port.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `index >= MAX_NODES` or the port overflows.
    pub fn rpc_port(&self, index: usize) -> Result<u16> {
        let offset = self.offset(index)?;
        self.base
            .checked_add(self.range)
            .and_then(|p| p.checked_add(offset))
            .ok_or_else(|| Error::Config(format!("rpc port for node {index} overflows")))
    }

    /// Loopback P2P address for a node.
    ///
    /// # Errors
    ///
    /// Same as [`PortLayout::p2p_port`].
    pub fn p2p_addr(&self, index: usize) -> Result<SocketAddr> {
        Ok(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            self.p2p_port(index)?,
        ))
    }

    /// Loopback RPC address for a node.
    ///
    /// # Errors
    ///
    /// Same as [`PortLayout::rpc_port`].
    pub fn rpc_addr(&self, index: usize) -> Result<SocketAddr> {
        Ok(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            self.rpc_port(index)?,
        ))
    }
}

/// Data directory of node `index` under `root`.
#[must_use]
pub fn node_dir(root: &Path, index: usize) -> PathBuf {
    root.join(format!("node{index}"))
}

/// Create the data directory for one node and write its configuration file.
///
/// Re-running this on an existing directory rewrites the configuration file
/// but leaves chain data alone.
///
/// # Errors
///
/// Returns an error if the index is out of range or the directory cannot be written.
pub async fn initialize_datadir(config: &HarnessConfig, index: usize) -> Result<PathBuf> {
    let layout = PortLayout::from_config(config);
    let dir = node_dir(&config.data_root, index);
    tokio::fs::create_dir_all(&dir).await?;

    let conf = format!(
        "regtest=1\nrpcuser={}\nrpcpassword={}\nport={}\nrpcport={}\nlisten=1\n",
        config.rpc_user,
        config.rpc_password,
        layout.p2p_port(index)?,
        layout.rpc_port(index)?,
    );

    tokio::fs::write(dir.join(&config.conf_file_name), conf).await?;
    debug!("Initialized data directory {} for node {}", dir.display(), index);
    Ok(dir)
}

/// Initialize clean data directories for nodes `0..count`.
///
/// # Errors
///
/// Returns an error if `count > MAX_NODES` or any directory cannot be written.
pub async fn initialize_chain_clean(config: &HarnessConfig, count: usize) -> Result<Vec<PathBuf>> {
    if count > MAX_NODES {
        return Err(Error::Config(format!(
            "cluster of {count} nodes exceeds MAX_NODES {MAX_NODES}"
        )));
    }
    let mut dirs = Vec::with_capacity(count);
    for index in 0..count {
        dirs.push(initialize_datadir(config, index).await?);
    }
    Ok(dirs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn layout(seed: u32) -> PortLayout {
        PortLayout::from_config(&HarnessConfig {
            port_seed: seed,
            ..HarnessConfig::default()
        })
    }

    #[test]
    fn test_ports_are_distinct_within_a_cluster() {
        let layout = layout(4242);
        let mut seen = HashSet::new();
        for i in 0..MAX_NODES {
            assert!(seen.insert(layout.p2p_port(i).unwrap()));
            assert!(seen.insert(layout.rpc_port(i).unwrap()));
        }
    }

    #[test]
    fn test_ports_are_deterministic() {
        assert_eq!(layout(9).p2p_port(3).unwrap(), layout(9).p2p_port(3).unwrap());
        assert_eq!(layout(9).rpc_port(3).unwrap(), layout(9).rpc_port(3).unwrap());
    }

    #[test]
    fn test_seed_zero_matches_base() {
        let layout = layout(0);
        assert_eq!(layout.p2p_port(0).unwrap(), 11_000);
        assert_eq!(layout.p2p_port(2).unwrap(), 11_002);
        assert_eq!(layout.rpc_port(2).unwrap(), 16_002);
    }

    #[test]
    fn test_adjacent_seeds_do_not_overlap() {
        let a: HashSet<u16> = (0..MAX_NODES).map(|i| layout(1).p2p_port(i).unwrap()).collect();
        let b: HashSet<u16> = (0..MAX_NODES).map(|i| layout(2).p2p_port(i).unwrap()).collect();
        assert!(a.is_disjoint(&b));
    }

    #[test]
    fn test_index_past_max_rejected() {
        assert!(layout(1).p2p_port(MAX_NODES).is_err());
        assert!(layout(1).rpc_addr(MAX_NODES).is_err());
    }

    #[tokio::test]
    async fn test_initialize_datadir_writes_conf() {
        let root = TempDir::new().unwrap();
        let config = HarnessConfig {
            data_root: root.path().to_path_buf(),
            port_seed: 0,
            ..HarnessConfig::default()
        };

        let dir = initialize_datadir(&config, 1).await.unwrap();
        assert_eq!(dir, root.path().join("node1"));

        let conf = std::fs::read_to_string(dir.join("bitcoin.conf")).unwrap();
        assert_eq!(
            conf,
            "regtest=1\nrpcuser=rt\nrpcpassword=rt\nport=11001\nrpcport=16001\nlisten=1\n"
        );
    }

    #[tokio::test]
    async fn test_initialize_chain_clean_creates_each_node() {
        let root = TempDir::new().unwrap();
        let config = HarnessConfig {
            data_root: root.path().to_path_buf(),
            ..HarnessConfig::default()
        };

        let dirs = initialize_chain_clean(&config, 3).await.unwrap();
        assert_eq!(dirs.len(), 3);
        for (i, dir) in dirs.iter().enumerate() {
            assert_eq!(dir, &node_dir(root.path(), i));
            assert!(dir.join("bitcoin.conf").exists());
        }
        assert!(initialize_chain_clean(&config, MAX_NODES + 1).await.is_err());
    }
}
