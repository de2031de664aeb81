//! Convergence barrier over node chain tips.
//!
//! Two primitives, deliberately separate:
//!
//! - [`sync_all`] / [`sync_all_with`] poll until a predicate holds across
//!   every node and fail with `SyncTimeout` otherwise.
//! - [`wait_then_snapshot`] sleeps a fixed time and reports whatever the
//!   nodes show, agreeing or not. Negative-sync scenarios assert on this.
//!
//! Every round queries all nodes concurrently and tips are never cached.

use crate::error::{Error, Result};
use crate::node::NodeHandle;
use futures::future::try_join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Observed height of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainTip {
    /// Node index.
    pub index: usize,
    /// Block height.
    pub height: u64,
}

/// One observation of a set of nodes, in caller order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainSnapshot {
    tips: Vec<ChainTip>,
}

impl ChainSnapshot {
    /// Wrap a list of tips.
    #[must_use]
    pub fn new(tips: Vec<ChainTip>) -> Self {
        Self { tips }
    }

    /// Tips in caller order.
    #[must_use]
    pub fn tips(&self) -> &[ChainTip] {
        &self.tips
    }

    /// Heights in caller order.
    #[must_use]
    pub fn heights(&self) -> Vec<u64> {
        self.tips.iter().map(|t| t.height).collect()
    }

    /// Height observed for node `index`.
    #[must_use]
    pub fn height_of(&self, index: usize) -> Option<u64> {
        self.tips.iter().find(|t| t.index == index).map(|t| t.height)
    }

    /// Whether nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tips.is_empty()
    }

    /// Compare heights position by position against `expected`.
    ///
    /// # Errors
    ///
    /// `Error::AssertionFailure` naming the first node whose height differs.
    /// A length mismatch is reported against the first missing or extra node.
    pub fn assert_heights(&self, expected: &[u64]) -> Result<()> {
        for (position, want) in expected.iter().enumerate() {
            match self.tips.get(position) {
                Some(tip) if tip.height == *want => {}
                Some(tip) => {
                    return Err(Error::assertion(
                        tip.index,
                        format!("height {want}"),
                        format!("height {}", tip.height),
                    ))
                }
                None => {
                    return Err(Error::assertion(
                        position,
                        format!("height {want}"),
                        "no observation",
                    ))
                }
            }
        }
        if let Some(extra) = self.tips.get(expected.len()) {
            return Err(Error::assertion(
                extra.index,
                "no observation",
                format!("height {}", extra.height),
            ));
        }
        Ok(())
    }
}

/// Default predicate: every node reports the same height.
#[must_use]
pub fn tips_equal(snapshot: &ChainSnapshot) -> bool {
    snapshot
        .tips
        .windows(2)
        .all(|pair| pair[0].height == pair[1].height)
}

/// Predicate: every node has reached at least `height`.
pub fn all_at_least(height: u64) -> impl Fn(&ChainSnapshot) -> bool {
    move |snapshot| snapshot.tips.iter().all(|t| t.height >= height)
}

/// Query every node's height once, concurrently.
///
/// # Errors
///
/// The first node error (`NodeUnavailable`, `RpcFailure`, ...) aborts the observation.
pub async fn observe(nodes: &[&NodeHandle]) -> Result<ChainSnapshot> {
    let tips = try_join_all(nodes.iter().map(|node| async move {
        let height = node.block_count().await?;
        Ok::<_, Error>(ChainTip {
            index: node.index(),
            height,
        })
    }))
    .await?;
    Ok(ChainSnapshot::new(tips))
}

/// Wait until all nodes report the same height.
///
/// # Errors
///
/// `Error::SyncTimeout` carrying the last snapshot if the heights never
/// agree; node errors abort immediately.
pub async fn sync_all(
    nodes: &[&NodeHandle],
    poll_interval: Duration,
    timeout: Duration,
) -> Result<ChainSnapshot> {
    sync_all_with(nodes, tips_equal, poll_interval, timeout).await
}

/// Wait until `predicate` holds over one concurrent observation of all nodes.
///
/// A round that is still in flight at the deadline is abandoned, so this
/// never waits much past `timeout` even if a node stops answering.
///
/// # Errors
///
/// `Error::SyncTimeout` carrying the last completed snapshot; node errors
/// abort immediately without retry.
pub async fn sync_all_with<P>(
    nodes: &[&NodeHandle],
    predicate: P,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<ChainSnapshot>
where
    P: Fn(&ChainSnapshot) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut last = ChainSnapshot::default();
    let mut rounds = 0u32;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, observe(nodes)).await {
            Ok(snapshot) => {
                let snapshot = snapshot?;
                rounds += 1;
                if predicate(&snapshot) {
                    info!(
                        "Nodes converged after {} rounds at heights {:?}",
                        rounds,
                        snapshot.heights()
                    );
                    return Ok(snapshot);
                }
                debug!("Round {}: heights {:?}", rounds, snapshot.heights());
                last = snapshot;
            }
            Err(_) => break,
        }

        if Instant::now() + poll_interval > deadline {
            break;
        }
        tokio::time::sleep(poll_interval).await;
    }

    info!(
        "Nodes did not converge within {:?}; last heights {:?}",
        timeout,
        last.heights()
    );
    Err(Error::SyncTimeout { timeout, last })
}

/// Sleep for `duration`, then report every node's tip without requiring agreement.
///
/// # Errors
///
/// Node errors from the final observation.
pub async fn wait_then_snapshot(nodes: &[&NodeHandle], duration: Duration) -> Result<ChainSnapshot> {
    debug!("Waiting {:?} before snapshot", duration);
    tokio::time::sleep(duration).await;
    let snapshot = observe(nodes).await?;
    info!("Snapshot heights {:?}", snapshot.heights());
    Ok(snapshot)
}
