//! # regtest-harness
//!
//! Multi-process test harness for regtest node clusters.
//!
//! The harness launches real node processes on isolated data directories,
//! wires them into a chosen peer topology, mines through RPC and waits for
//! the nodes to agree (or deliberately fail to agree) on a chain tip. It is
//! built for initial-block-download, pruning and clock-skew scenarios where
//! the outcome depends on exactly who is connected to whom.
//!
//! ## Architecture
//!
//! - [`node`]: one OS process per [`NodeHandle`], kill-on-drop
//! - [`rpc`]: typed JSON-RPC client over a pluggable [`Transport`]
//! - [`topology`]: requested peer links as a [`NetworkGraph`]
//! - [`clock`]: per-node simulated time
//! - [`barrier`]: `sync_all` and `wait_then_snapshot`
//! - [`tweak`]: the runtime tweak query model
//! - [`cluster`]: the per-test context tying these together
//!
//! ## Example
//!
//! ```rust,no_run
//! use regtest_harness::{run_scenario, HarnessConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     run_scenario(HarnessConfig::from_env(), |cluster| {
//!         Box::pin(async move {
//!             cluster.start_nodes(&[vec![], vec![], vec![]]).await?;
//!             cluster.interconnect_all().await?;
//!             cluster.generate(0, 10).await?;
//!             cluster.sync_all().await?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod barrier;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod datadir;
pub mod error;
pub mod node;
pub mod rpc;
pub mod topology;
pub mod tweak;

pub use barrier::{
    all_at_least, observe, sync_all, sync_all_with, tips_equal, wait_then_snapshot, ChainSnapshot,
    ChainTip,
};
pub use clock::{clear_mock_time, set_mock_time, skewed_now, ONE_DAY_AND_A_SECOND, STALE_TIP_AGE};
pub use cluster::{run_scenario, Cluster};
pub use config::HarnessConfig;
pub use datadir::{PortLayout, MAX_NODES};
pub use error::{Error, Result, TransportError};
pub use node::{wait_all_exited, NodeHandle, NodeState};
pub use rpc::{HttpTransport, RpcClient, Transport};
pub use topology::{Edge, NetworkGraph, TopologyController};
pub use tweak::{TweakQuery, TweakSet};
