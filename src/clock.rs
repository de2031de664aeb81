//! Per-node simulated clocks.
//!
//! Mock time is set on one node at a time; its peers keep the real clock.
//! The harness only transmits absolute timestamps: whether and how the node
//! advances from there is the node's business.

use crate::error::{Error, Result};
use crate::node::NodeHandle;
use std::time::Duration;
use tracing::info;

/// Tip age after which a node considers a peer's chain stale.
pub const STALE_TIP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Skew that puts a node just past [`STALE_TIP_AGE`].
pub const ONE_DAY_AND_A_SECOND: Duration = Duration::from_secs(24 * 60 * 60 + 1);

/// Current wall-clock time in Unix seconds.
#[must_use]
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Wall-clock time `ahead` in the future, in Unix seconds.
#[must_use]
pub fn skewed_now(ahead: Duration) -> u64 {
    unix_now().saturating_add(ahead.as_secs())
}

/// Make `node` report `timestamp` as its current time.
///
/// Only `node` is affected. The override is remembered on the handle until
/// the node stops.
///
/// # Errors
///
/// `Error::Config` for a zero timestamp (use [`clear_mock_time`]),
/// `Error::NodeUnavailable` if the node is not running, and RPC errors.
pub async fn set_mock_time(node: &NodeHandle, timestamp: u64) -> Result<()> {
    if timestamp == 0 {
        return Err(Error::Config(
            "mock time 0 means 'real clock'; use clear_mock_time".to_string(),
        ));
    }
    node.rpc().await?.set_mock_time(timestamp).await?;
    node.record_clock_override(Some(timestamp));
    info!("Node {} mock time set to {}", node.index(), timestamp);
    Ok(())
}

/// Return `node` to the real clock.
///
/// # Errors
///
/// `Error::NodeUnavailable` if the node is not running, and RPC errors.
pub async fn clear_mock_time(node: &NodeHandle) -> Result<()> {
    node.rpc().await?.set_mock_time(0).await?;
    node.record_clock_override(None);
    info!("Node {} back on the real clock", node.index());
    Ok(())
}
