//! Per-test cluster context.
//!
//! A [`Cluster`] owns the node slots, the topology controller and the
//! harness configuration for one scenario. Nothing here is global: two
//! clusters with different port seeds and data roots can run side by side.
//!
//! Prefer [`run_scenario`], which tears the cluster down whatever the
//! scenario returns. A cluster dropped without teardown still kills its
//! processes (children are spawned kill-on-drop) but skips the graceful
//! stop and leaves the data root behind.

use crate::barrier::{self, ChainSnapshot};
use crate::clock;
use crate::config::HarnessConfig;
use crate::datadir::{self, MAX_NODES};
use crate::error::{Error, Result};
use crate::node::{self, NodeHandle};
use crate::topology::TopologyController;
use futures::future::{join_all, try_join_all, BoxFuture};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Nodes, links and configuration for one scenario.
#[derive(Debug)]
pub struct Cluster {
    config: HarnessConfig,
    nodes: Vec<Option<NodeHandle>>,
    topology: TopologyController,
    torn_down: bool,
}

impl Cluster {
    /// Validate `config` and create its data root.
    ///
    /// # Errors
    ///
    /// `Error::Config` for an invalid configuration, `Error::Io` if the data
    /// root cannot be created.
    pub async fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.data_root).await?;
        info!(
            "Cluster data root {} (binary {})",
            config.data_root.display(),
            config.binary.display()
        );
        Ok(Self::empty(config))
    }

    fn empty(config: HarnessConfig) -> Self {
        Self {
            config,
            nodes: std::iter::repeat_with(|| None).take(MAX_NODES).collect(),
            topology: TopologyController::new(),
            torn_down: false,
        }
    }

    /// Harness configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Topology controller for this cluster.
    #[must_use]
    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    /// Create fresh data directories for nodes `0..count`.
    ///
    /// # Errors
    ///
    /// `Error::Config` if `count` exceeds [`MAX_NODES`]; I/O errors.
    pub async fn initialize_chain_clean(&self, count: usize) -> Result<Vec<PathBuf>> {
        datadir::initialize_chain_clean(&self.config, count).await
    }

    fn slot(&self, index: usize) -> Result<&Option<NodeHandle>> {
        self.nodes.get(index).ok_or_else(|| {
            Error::Config(format!("node index {index} exceeds MAX_NODES {MAX_NODES}"))
        })
    }

    /// Start node `index` with pass-through `options`.
    ///
    /// The data directory is initialized on first use and reused after that,
    /// so a restart keeps the node's chain.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the index is out of range or already running,
    /// `Error::StartupFailure` if the node does not come up.
    pub async fn start_node(&mut self, index: usize, options: &[String]) -> Result<&NodeHandle> {
        if self.slot(index)?.is_some() {
            return Err(Error::Config(format!("node {index} is already running")));
        }
        let handle = self.launch(index, options).await?;
        self.topology.node_started(index);
        let handle: &NodeHandle = self.nodes[index].insert(handle);
        Ok(handle)
    }

    async fn launch(&self, index: usize, options: &[String]) -> Result<NodeHandle> {
        let dir = datadir::node_dir(&self.config.data_root, index);
        let conf = dir.join(&self.config.conf_file_name);
        if !tokio::fs::try_exists(&conf).await? {
            datadir::initialize_datadir(&self.config, index).await?;
        }
        NodeHandle::start(index, &dir, options, &self.config).await
    }

    /// Start nodes `0..options.len()` concurrently, node `i` with `options[i]`.
    ///
    /// Nodes that did come up are kept so teardown can stop them.
    ///
    /// # Errors
    ///
    /// The first startup error, after every launch has settled.
    pub async fn start_nodes(&mut self, options: &[Vec<String>]) -> Result<()> {
        for index in 0..options.len() {
            if self.slot(index)?.is_some() {
                return Err(Error::Config(format!("node {index} is already running")));
            }
        }

        let this = &*self;
        let results = join_all(
            options
                .iter()
                .enumerate()
                .map(|(index, opts)| this.launch(index, opts)),
        )
        .await;

        let mut first_error = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(handle) => {
                    self.topology.node_started(index);
                    self.nodes[index] = Some(handle);
                }
                Err(e) => {
                    warn!("Node {} failed to start: {}", index, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Started {} nodes", options.len());
                Ok(())
            }
        }
    }

    /// Running node `index`.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` if that slot is empty.
    pub fn node(&self, index: usize) -> Result<&NodeHandle> {
        self.nodes
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(Error::NodeUnavailable { index })
    }

    /// Look up several running nodes, in the order given.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` for the first empty slot.
    pub fn nodes(&self, indices: &[usize]) -> Result<Vec<&NodeHandle>> {
        indices.iter().map(|&i| self.node(i)).collect()
    }

    /// Every occupied slot, by index.
    #[must_use]
    pub fn running(&self) -> Vec<&NodeHandle> {
        self.nodes.iter().flatten().collect()
    }

    /// Stop node `index` and wait for its process to exit.
    ///
    /// Stopping an empty slot does nothing.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` if the process outlives the shutdown timeout.
    pub async fn stop_node(&mut self, index: usize) -> Result<()> {
        let Some(handle) = self.nodes.get(index).and_then(Option::as_ref) else {
            debug!("Node {} already stopped", index);
            return Ok(());
        };
        handle.stop().await?;
        handle.wait_exited(self.config.shutdown_timeout()).await?;
        self.topology.node_stopped(index);
        self.nodes[index] = None;
        info!("Node {} stopped", index);
        Ok(())
    }

    /// Stop every running node, then wait for all of them to exit.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` listing every node still alive. The slots of
    /// nodes that did exit are cleared either way.
    pub async fn stop_all(&mut self) -> Result<()> {
        for handle in self.running() {
            if let Err(e) = handle.stop().await {
                warn!("Failed to stop node {}: {}", handle.index(), e);
            }
        }
        self.wait_all_exited().await
    }

    /// Wait for every occupied slot's process to exit, and free the slots
    /// that did.
    ///
    /// This does not stop anything: a node nobody asked to stop holds the
    /// wait for the full shutdown timeout. Use [`stop_all`](Self::stop_all)
    /// to request shutdown first.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` listing every node still alive.
    pub async fn wait_all_exited(&mut self) -> Result<()> {
        let result = node::wait_all_exited(&self.running(), self.config.shutdown_timeout()).await;
        let stuck = match &result {
            Err(Error::ShutdownTimeout { indices, .. }) => indices.clone(),
            _ => Vec::new(),
        };
        for index in 0..self.nodes.len() {
            if self.nodes[index].is_some() && !stuck.contains(&index) {
                self.nodes[index] = None;
                self.topology.node_stopped(index);
            }
        }
        result
    }

    /// Stop node `index` and start it again on the same data directory.
    ///
    /// `options` replaces the node's options; `None` keeps the old ones.
    ///
    /// # Errors
    ///
    /// Errors from [`stop_node`](Self::stop_node) and [`start_node`](Self::start_node).
    pub async fn restart_node(
        &mut self,
        index: usize,
        options: Option<&[String]>,
    ) -> Result<&NodeHandle> {
        let options = match options {
            Some(o) => o.to_vec(),
            None => self.node(index)?.options().to_vec(),
        };
        self.stop_node(index).await?;
        self.start_node(index, &options).await
    }

    /// Ask node `from` to connect to node `to`.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::connect`].
    pub async fn connect(&self, from: usize, to: usize) -> Result<()> {
        self.topology
            .connect(self.node(from)?, self.node(to)?)
            .await
    }

    /// Ask node `from` to drop its link to node `to`.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::disconnect`].
    pub async fn disconnect(&self, from: usize, to: usize) -> Result<()> {
        self.topology
            .disconnect(self.node(from)?, self.node(to)?)
            .await
    }

    /// Fully mesh the given nodes.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::interconnect`].
    pub async fn interconnect(&self, indices: &[usize]) -> Result<()> {
        self.topology.interconnect(&self.nodes(indices)?).await
    }

    /// Fully mesh every running node.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::interconnect`].
    pub async fn interconnect_all(&self) -> Result<()> {
        self.topology.interconnect(&self.running()).await
    }

    /// Wait until every requested peer of node `index` has completed its handshake.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::wait_for_handshake`].
    pub async fn wait_for_handshake(&self, index: usize) -> Result<()> {
        self.topology
            .wait_for_handshake(
                self.node(index)?,
                self.config.sync_timeout(),
                self.config.poll_interval(),
            )
            .await
    }

    /// Mine `blocks` on node `index`.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` or RPC errors.
    pub async fn generate(&self, index: usize, blocks: u32) -> Result<Vec<String>> {
        self.node(index)?.generate(blocks).await
    }

    /// Set node `index`'s simulated clock. Other nodes are untouched.
    ///
    /// # Errors
    ///
    /// See [`clock::set_mock_time`].
    pub async fn set_mock_time(&self, index: usize, timestamp: u64) -> Result<()> {
        clock::set_mock_time(self.node(index)?, timestamp).await
    }

    /// Return node `index` to the real clock.
    ///
    /// # Errors
    ///
    /// See [`clock::clear_mock_time`].
    pub async fn clear_mock_time(&self, index: usize) -> Result<()> {
        clock::clear_mock_time(self.node(index)?).await
    }

    /// Wait until every running node reports the same height.
    ///
    /// # Errors
    ///
    /// See [`barrier::sync_all`].
    pub async fn sync_all(&self) -> Result<ChainSnapshot> {
        barrier::sync_all(
            &self.running(),
            self.config.poll_interval(),
            self.config.sync_timeout(),
        )
        .await
    }

    /// Wait until the given nodes report the same height.
    ///
    /// # Errors
    ///
    /// See [`barrier::sync_all`].
    pub async fn sync_nodes(&self, indices: &[usize]) -> Result<ChainSnapshot> {
        barrier::sync_all(
            &self.nodes(indices)?,
            self.config.poll_interval(),
            self.config.sync_timeout(),
        )
        .await
    }

    /// Sleep for `duration`, then snapshot the given nodes without requiring agreement.
    ///
    /// # Errors
    ///
    /// See [`barrier::wait_then_snapshot`].
    pub async fn wait_then_snapshot(
        &self,
        indices: &[usize],
        duration: Duration,
    ) -> Result<ChainSnapshot> {
        barrier::wait_then_snapshot(&self.nodes(indices)?, duration).await
    }

    /// Current heights of the given nodes.
    ///
    /// # Errors
    ///
    /// See [`barrier::observe`].
    pub async fn block_counts(&self, indices: &[usize]) -> Result<ChainSnapshot> {
        barrier::observe(&self.nodes(indices)?).await
    }

    /// Tip hashes of the given nodes, in the order given.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` or RPC errors.
    pub async fn best_block_hashes(&self, indices: &[usize]) -> Result<Vec<String>> {
        try_join_all(self.nodes(indices)?.into_iter().map(NodeHandle::best_block_hash)).await
    }

    /// Assert that the given nodes share one tip hash, not merely one height.
    ///
    /// # Errors
    ///
    /// `Error::AssertionFailure` naming the first node on a different tip.
    pub async fn assert_same_tip(&self, indices: &[usize]) -> Result<()> {
        let hashes = self.best_block_hashes(indices).await?;
        let Some((first, rest)) = hashes.split_first() else {
            return Ok(());
        };
        for (index, hash) in indices[1..].iter().zip(rest) {
            if hash != first {
                return Err(Error::assertion(
                    *index,
                    format!("tip {first}"),
                    format!("tip {hash}"),
                ));
            }
        }
        Ok(())
    }

    /// Assert that nodes `0..expected.len()` are at exactly the expected heights.
    ///
    /// # Errors
    ///
    /// `Error::AssertionFailure` naming the first node that differs.
    pub async fn assert_block_counts(&self, expected: &[u64]) -> Result<()> {
        let indices: Vec<usize> = (0..expected.len()).collect();
        self.block_counts(&indices).await?.assert_heights(expected)
    }

    /// Stop every node, wait for exit, kill stragglers and remove the data root.
    ///
    /// Safe to call more than once. Every step runs even if an earlier one
    /// failed; the first failure is returned at the end.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` if a node had to be killed, I/O errors from cleanup.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.torn_down && self.running().is_empty() {
            return Ok(());
        }
        info!("Tearing down cluster");

        let mut outcome = self.stop_all().await;
        if outcome.is_err() {
            for handle in self.running() {
                warn!("Killing node {} after shutdown timeout", handle.index());
                handle.kill().await;
            }
            for index in 0..self.nodes.len() {
                if self.nodes[index].take().is_some() {
                    self.topology.node_stopped(index);
                }
            }
        }

        if self.config.cleanup_data_dir {
            if let Err(e) = tokio::fs::remove_dir_all(&self.config.data_root).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove {}: {}",
                        self.config.data_root.display(),
                        e
                    );
                    if outcome.is_ok() {
                        outcome = Err(e.into());
                    }
                }
            }
        }

        self.torn_down = true;
        info!("Cluster teardown complete");
        outcome
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let live = self.nodes.iter().flatten().count();
        if live > 0 {
            warn!(
                "Cluster dropped with {} nodes running; killing without graceful stop",
                live
            );
        }
    }
}

/// Run `scenario` on a fresh cluster and always tear it down.
///
/// ```no_run
/// # async fn demo() -> regtest_harness::Result<()> {
/// use regtest_harness::{run_scenario, HarnessConfig};
///
/// run_scenario(HarnessConfig::from_env(), |cluster| {
///     Box::pin(async move {
///         cluster.start_nodes(&[vec![], vec![]]).await?;
///         cluster.interconnect_all().await?;
///         cluster.generate(0, 10).await?;
///         cluster.sync_all().await?;
///         Ok(())
///     })
/// })
/// .await
/// # }
/// ```
///
/// # Errors
///
/// The scenario's error if it failed, otherwise any teardown error.
pub async fn run_scenario<F>(config: HarnessConfig, scenario: F) -> Result<()>
where
    F: for<'a> FnOnce(&'a mut Cluster) -> BoxFuture<'a, Result<()>>,
{
    let mut cluster = Cluster::new(config).await?;
    let result = scenario(&mut cluster).await;
    if let Err(e) = &result {
        warn!("Scenario failed: {}", e);
    }
    let teardown = cluster.teardown().await;
    result.and(teardown)
}
