//! Peer topology between running nodes.
//!
//! [`TopologyController`] is the only writer of the [`NetworkGraph`]. Edges
//! are directed and record what was *requested*: `addnode ... onetry` is
//! best effort, so an edge does not prove the link is up. Use
//! [`TopologyController::wait_for_handshake`] when that matters.

use crate::barrier::ChainSnapshot;
use crate::error::{Error, Result};
use crate::node::NodeHandle;
use crate::rpc::AddNodeCommand;
use parking_lot::RwLock;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// JSON-RPC error code for `disconnectnode` on a peer that is not connected.
const RPC_CLIENT_NODE_NOT_CONNECTED: i64 = -29;

/// A requested peer link `from -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    /// Node that initiated the connection.
    pub from: usize,
    /// Node it was asked to connect to.
    pub to: usize,
}

/// Running nodes and the links requested between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkGraph {
    vertices: BTreeSet<usize>,
    edges: BTreeSet<Edge>,
}

impl NetworkGraph {
    /// Empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running node.
    pub fn add_vertex(&mut self, index: usize) {
        self.vertices.insert(index);
    }

    /// Drop a node and every edge touching it.
    pub fn remove_vertex(&mut self, index: usize) {
        self.vertices.remove(&index);
        self.edges.retain(|e| e.from != index && e.to != index);
    }

    /// Record `from -> to`. Returns false if it was already present.
    pub fn add_edge(&mut self, from: usize, to: usize) -> bool {
        self.vertices.insert(from);
        self.vertices.insert(to);
        self.edges.insert(Edge { from, to })
    }

    /// Forget `from -> to`. Returns false if it was not present.
    pub fn remove_edge(&mut self, from: usize, to: usize) -> bool {
        self.edges.remove(&Edge { from, to })
    }

    /// Whether `index` is a running node.
    #[must_use]
    pub fn contains_vertex(&self, index: usize) -> bool {
        self.vertices.contains(&index)
    }

    /// Whether `from -> to` was requested.
    #[must_use]
    pub fn contains_edge(&self, from: usize, to: usize) -> bool {
        self.edges.contains(&Edge { from, to })
    }

    /// Whether either direction between `a` and `b` was requested.
    #[must_use]
    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        self.contains_edge(a, b) || self.contains_edge(b, a)
    }

    /// Nodes directly linked to `index` in either direction.
    #[must_use]
    pub fn neighbours(&self, index: usize) -> BTreeSet<usize> {
        self.edges
            .iter()
            .filter_map(|e| {
                if e.from == index {
                    Some(e.to)
                } else if e.to == index {
                    Some(e.from)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Whether blocks can flow between `a` and `b` through any chain of links.
    #[must_use]
    pub fn is_reachable(&self, a: usize, b: usize) -> bool {
        if a == b {
            return self.contains_vertex(a);
        }
        let mut seen = BTreeSet::from([a]);
        let mut queue = VecDeque::from([a]);
        while let Some(current) = queue.pop_front() {
            for next in self.neighbours(current) {
                if next == b {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// All requested links, ordered.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// All running nodes, ordered.
    pub fn vertices(&self) -> impl Iterator<Item = &usize> {
        self.vertices.iter()
    }
}

/// Issues peer-link RPCs and keeps the [`NetworkGraph`] in step.
#[derive(Debug, Default)]
pub struct TopologyController {
    graph: RwLock<NetworkGraph>,
}

impl TopologyController {
    /// Controller with an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current graph.
    #[must_use]
    pub fn graph(&self) -> NetworkGraph {
        self.graph.read().clone()
    }

    /// Register a node that just became ready.
    pub fn node_started(&self, index: usize) {
        self.graph.write().add_vertex(index);
    }

    /// Drop a stopped node; its links died with the process.
    pub fn node_stopped(&self, index: usize) {
        self.graph.write().remove_vertex(index);
    }

    /// Ask `from` to open an outbound connection to `to`.
    ///
    /// Returns once the request is accepted, not once the link is up.
    ///
    /// # Errors
    ///
    /// `Error::Config` when `from` and `to` are the same node,
    /// `Error::NodeUnavailable` if either is not running, RPC errors otherwise.
    pub async fn connect(&self, from: &NodeHandle, to: &NodeHandle) -> Result<()> {
        if from.index() == to.index() {
            return Err(Error::Config(format!(
                "cannot connect node {} to itself",
                from.index()
            )));
        }
        if !to.is_running().await {
            return Err(Error::NodeUnavailable { index: to.index() });
        }

        from.rpc()
            .await?
            .add_node(to.p2p_addr(), AddNodeCommand::OneTry)
            .await?;

        if self.graph.write().add_edge(from.index(), to.index()) {
            info!("Connected node {} -> node {}", from.index(), to.index());
        } else {
            debug!(
                "Node {} -> node {} requested again",
                from.index(),
                to.index()
            );
        }
        Ok(())
    }

    /// Link every pair of `nodes` in both directions.
    ///
    /// # Errors
    ///
    /// The first [`connect`](Self::connect) error.
    pub async fn interconnect(&self, nodes: &[&NodeHandle]) -> Result<()> {
        for (i, a) in nodes.iter().enumerate() {
            for b in &nodes[i + 1..] {
                self.connect(a, b).await?;
                self.connect(b, a).await?;
            }
        }
        info!("Interconnected {} nodes", nodes.len());
        Ok(())
    }

    /// Ask `from` to drop its link to `to`. Neither process is stopped.
    ///
    /// A peer that is already gone counts as disconnected.
    ///
    /// # Errors
    ///
    /// `Error::NodeUnavailable` if `from` is not running, other RPC errors.
    pub async fn disconnect(&self, from: &NodeHandle, to: &NodeHandle) -> Result<()> {
        match from.rpc().await?.disconnect_node(to.p2p_addr()).await {
            Ok(()) => {}
            Err(Error::Rpc { code, .. }) if code == RPC_CLIENT_NODE_NOT_CONNECTED => {
                debug!(
                    "Node {} was not connected to node {}",
                    from.index(),
                    to.index()
                );
            }
            Err(e) => return Err(e),
        }
        self.graph.write().remove_edge(from.index(), to.index());
        info!("Disconnected node {} -> node {}", from.index(), to.index());
        Ok(())
    }

    /// Poll `getpeerinfo` on `node` until no peer is mid-handshake.
    ///
    /// # Errors
    ///
    /// `Error::SyncTimeout` if some peer still reports version 0 after
    /// `timeout`; node errors propagate.
    pub async fn wait_for_handshake(
        &self,
        node: &NodeHandle,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let peers = node.rpc().await?.get_peer_info().await?;
            let pending = peers.iter().filter(|p| p.version == 0).count();
            if pending == 0 {
                debug!(
                    "Node {} handshakes complete ({} peers)",
                    node.index(),
                    peers.len()
                );
                return Ok(());
            }
            if Instant::now() + poll_interval > deadline {
                info!(
                    "Node {} still has {} peers mid-handshake after {:?}",
                    node.index(),
                    pending,
                    timeout
                );
                return Err(Error::SyncTimeout {
                    timeout,
                    last: ChainSnapshot::default(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
