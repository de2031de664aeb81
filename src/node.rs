//! Node process lifecycle.
//!
//! A [`NodeHandle`] owns exactly one node process bound to its own data
//! directory. The handle is the only owner of the child: dropping it kills
//! the process, so a failed test never orphans a node.
//!
//! Lifecycle:
//!
//! ```text
//! start ──▶ Starting ──(RPC ready)──▶ Running ──stop──▶ Stopping ──(exit)──▶ Stopped
//!               │
//!               └──(exit / timeout)──▶ Failed
//! ```
//!
//! `stop` only requests shutdown; [`wait_all_exited`] is what guarantees the
//! processes are gone.

use crate::config::HarnessConfig;
use crate::datadir::PortLayout;
use crate::error::{Error, Result};
use crate::rpc::{HttpTransport, RpcClient};
use futures::future::join_all;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polling interval when waiting for a process to exit.
const EXIT_POLL_INTERVAL_MS: u64 = 100;

/// State of an individual node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Process spawned, RPC not ready yet.
    Starting,
    /// RPC endpoint answering.
    Running,
    /// Shutdown requested.
    Stopping,
    /// Process has exited.
    Stopped,
    /// Startup was abandoned.
    Failed(String),
}

impl NodeState {
    /// Whether RPC calls may be issued.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A started node: its process, endpoints and RPC client.
#[derive(Debug)]
pub struct NodeHandle {
    index: usize,
    data_dir: PathBuf,
    options: Vec<String>,
    p2p_addr: SocketAddr,
    rpc_addr: SocketAddr,
    rpc: RpcClient,
    process: Mutex<Option<Child>>,
    state: Arc<RwLock<NodeState>>,
    clock_override: parking_lot::RwLock<Option<u64>>,
}

impl NodeHandle {
    /// Launch node `index` on `data_dir` and wait for its RPC endpoint.
    ///
    /// `options` are passed through to the node verbatim after the harness's
    /// own arguments.
    ///
    /// # Errors
    ///
    /// Returns `Error::StartupFailure` if the process cannot be spawned, exits
    /// early, reports a non-transient RPC error, or is not ready within
    /// the configured startup timeout.
    pub async fn start(
        index: usize,
        data_dir: &Path,
        options: &[String],
        config: &HarnessConfig,
    ) -> Result<Self> {
        let layout = PortLayout::from_config(config);
        let p2p_addr = layout.p2p_addr(index)?;
        let rpc_addr = layout.rpc_addr(index)?;

        debug!(
            "Starting node {} (p2p {}, rpc {}) in {}",
            index,
            p2p_addr,
            rpc_addr,
            data_dir.display()
        );

        let mut command = Command::new(&config.binary);
        command
            .arg(format!("-datadir={}", data_dir.display()))
            .args(&config.default_args)
            .arg(format!("-port={}", p2p_addr.port()))
            .arg(format!("-rpcport={}", rpc_addr.port()))
            .args(options)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if config.enable_node_logging {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().map_err(|e| Error::StartupFailure {
            index,
            reason: format!("failed to spawn {}: {e}", config.binary.display()),
        })?;

        let transport = HttpTransport::new(
            rpc_addr,
            config.rpc_user.clone(),
            config.rpc_password.clone(),
            config.rpc_timeout(),
        )?;

        let handle = Self {
            index,
            data_dir: data_dir.to_path_buf(),
            options: options.to_vec(),
            p2p_addr,
            rpc_addr,
            rpc: RpcClient::new(index, Arc::new(transport)),
            process: Mutex::new(Some(child)),
            state: Arc::new(RwLock::new(NodeState::Starting)),
            clock_override: parking_lot::RwLock::new(None),
        };

        handle
            .wait_for_ready(config.startup_timeout(), config.poll_interval())
            .await?;
        info!("Node {} ready on {}", index, rpc_addr);
        Ok(handle)
    }

    /// Poll `getblockcount` until it answers, the process dies, or time runs out.
    async fn wait_for_ready(&self, timeout: Duration, poll: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = self.try_exit_status().await? {
                return self
                    .fail_startup(format!("process exited with {status} before RPC was ready"))
                    .await;
            }

            match self.rpc.get_block_count().await {
                Ok(height) => {
                    debug!("Node {} answered at height {}", self.index, height);
                    *self.state.write().await = NodeState::Running;
                    return Ok(());
                }
                Err(e) if e.is_transient_startup() => {
                    debug!("Node {} not ready yet: {}", self.index, e);
                }
                Err(e) => return self.fail_startup(e.to_string()).await,
            }

            if Instant::now() >= deadline {
                return self
                    .fail_startup(format!("RPC not ready within {timeout:?}"))
                    .await;
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn fail_startup(&self, reason: String) -> Result<()> {
        if let Some(child) = self.process.lock().await.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Node {} kill after failed startup: {}", self.index, e);
            }
        }
        *self.state.write().await = NodeState::Failed(reason.clone());
        Err(Error::StartupFailure {
            index: self.index,
            reason,
        })
    }

    async fn try_exit_status(&self) -> Result<Option<std::process::ExitStatus>> {
        match self.process.lock().await.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    /// Node index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Data directory this node owns.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Options the node was started with.
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// P2P listen address.
    #[must_use]
    pub fn p2p_addr(&self) -> SocketAddr {
        self.p2p_addr
    }

    /// RPC endpoint address.
    #[must_use]
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> NodeState {
        self.state.read().await.clone()
    }

    /// Whether the node accepts RPC calls.
    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_running()
    }

    /// The simulated time last set on this node, if any.
    #[must_use]
    pub fn clock_override(&self) -> Option<u64> {
        *self.clock_override.read()
    }

    pub(crate) fn record_clock_override(&self, timestamp: Option<u64>) {
        *self.clock_override.write() = timestamp;
    }

    /// RPC client of a running node.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeUnavailable` once the node is stopping or stopped.
    pub async fn rpc(&self) -> Result<&RpcClient> {
        if self.is_running().await {
            Ok(&self.rpc)
        } else {
            Err(Error::NodeUnavailable { index: self.index })
        }
    }

    /// Mine `blocks` blocks on this node.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` if the node is not running; RPC errors propagate.
    pub async fn generate(&self, blocks: u32) -> Result<Vec<String>> {
        self.rpc().await?.generate(blocks).await
    }

    /// Hash of the current tip.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` if the node is not running; RPC errors propagate.
    pub async fn best_block_hash(&self) -> Result<String> {
        self.rpc().await?.get_best_block_hash().await
    }

    /// Current chain height, re-queried on every call.
    ///
    /// A transport failure on a node whose process has exited is reported as
    /// `NodeUnavailable` rather than `RpcFailure`.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` if the node is stopping or gone; other RPC
    /// errors propagate.
    pub async fn block_count(&self) -> Result<u64> {
        let rpc = self.rpc().await?;
        let result = rpc.get_block_count().await;
        if matches!(result, Err(Error::RpcFailure { .. }))
            && (!self.is_running().await || self.has_exited().await)
        {
            return Err(Error::NodeUnavailable { index: self.index });
        }
        result
    }

    async fn has_exited(&self) -> bool {
        matches!(self.try_exit_status().await, Ok(Some(_)))
    }

    /// Request graceful shutdown and return immediately.
    ///
    /// Stopping a node that is already stopping or stopped does nothing. If
    /// the `stop` RPC cannot be delivered the process is killed instead.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` only if the fallback kill fails.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                NodeState::Stopping | NodeState::Stopped => {
                    debug!("Node {} already stopping", self.index);
                    return Ok(());
                }
                _ => *state = NodeState::Stopping,
            }
        }

        info!("Stopping node {}", self.index);
        if let Err(e) = self.rpc.stop().await {
            warn!(
                "Node {} did not accept stop ({}), killing process",
                self.index, e
            );
            if let Some(child) = self.process.lock().await.as_mut() {
                child.start_kill()?;
            }
        }
        Ok(())
    }

    /// Wait until the process has exited.
    ///
    /// Returns at once if it already has.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShutdownTimeout` if the process is still alive after `timeout`.
    pub async fn wait_exited(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut process = self.process.lock().await;

        let Some(child) = process.as_mut() else {
            *self.state.write().await = NodeState::Stopped;
            self.record_clock_override(None);
            return Ok(());
        };

        loop {
            if let Some(status) = child.try_wait()? {
                debug!("Node {} exited with {}", self.index, status);
                *process = None;
                *self.state.write().await = NodeState::Stopped;
                self.record_clock_override(None);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::ShutdownTimeout {
                    indices: vec![self.index],
                    timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(EXIT_POLL_INTERVAL_MS)).await;
        }
    }

    /// Kill the process without asking. Used for best-effort teardown.
    pub(crate) async fn kill(&self) {
        let mut process = self.process.lock().await;
        if let Some(child) = process.as_mut() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill node {}: {}", self.index, e);
            }
        }
        *process = None;
        *self.state.write().await = NodeState::Stopped;
        self.record_clock_override(None);
    }

    /// Handle around an existing client with no process attached.
    #[cfg(test)]
    pub(crate) fn with_client(index: usize, rpc: RpcClient) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            index,
            data_dir: PathBuf::new(),
            options: Vec::new(),
            p2p_addr: SocketAddr::from(([127, 0, 0, 1], 11_000 + index as u16)),
            rpc_addr: addr,
            rpc,
            process: Mutex::new(None),
            state: Arc::new(RwLock::new(NodeState::Running)),
            clock_override: parking_lot::RwLock::new(None),
        }
    }

    /// Like [`with_client`](Self::with_client), but owning `child`.
    #[cfg(test)]
    pub(crate) fn with_process(index: usize, rpc: RpcClient, child: Child) -> Self {
        let handle = Self::with_client(index, rpc);
        Self {
            process: Mutex::new(Some(child)),
            ..handle
        }
    }

    #[cfg(test)]
    pub(crate) fn with_options(self, options: Vec<String>) -> Self {
        Self { options, ..self }
    }
}

/// Block until every handle's process has exited.
///
/// All handles are waited on concurrently. Handles that already exited are
/// no-ops.
///
/// # Errors
///
/// Returns `Error::ShutdownTimeout` listing every node still alive after `timeout`.
pub async fn wait_all_exited(handles: &[&NodeHandle], timeout: Duration) -> Result<()> {
    let results = join_all(handles.iter().map(|h| h.wait_exited(timeout))).await;

    let mut stuck = Vec::new();
    for (handle, result) in handles.iter().zip(results) {
        match result {
            Ok(()) => {}
            Err(Error::ShutdownTimeout { .. }) => stuck.push(handle.index()),
            Err(e) => return Err(e),
        }
    }

    if stuck.is_empty() {
        Ok(())
    } else {
        warn!("Nodes {:?} did not exit within {:?}", stuck, timeout);
        Err(Error::ShutdownTimeout {
            indices: stuck,
            timeout,
        })
    }
}
