//! Initial block download from pruned and full peers, with and without a
//! skewed clock on the syncing node.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{full_node, pruned_node, scenario_config};
use regtest_harness::{run_scenario, skewed_now, ONE_DAY_AND_A_SECOND};
use std::time::Duration;

/// How long the negative case gives node 2 to (not) sync.
const NO_SYNC_WINDOW: Duration = Duration::from_secs(5);

#[tokio::test]
#[ignore = "Requires a node binary (set NODE_BINARY) - run with --ignored"]
async fn test_ibd_from_pruned_and_full_peers() {
    run_scenario(scenario_config(0), |cluster| {
        Box::pin(async move {
            cluster.initialize_chain_clean(3).await?;

            // Baseline: 2001 blocks, enough to need a second GETHEADERS.
            cluster
                .start_nodes(&[full_node(), full_node(), pruned_node()])
                .await?;
            cluster.interconnect_all().await?;
            cluster.sync_all().await?;
            for blocks in [500, 500, 500, 501] {
                cluster.generate(0, blocks).await?;
            }
            cluster.sync_all().await?;
            cluster.assert_block_counts(&[2001, 2001, 2001]).await?;
            cluster.stop_all().await?;

            // Full and pruned nodes both sync from a regular node.
            cluster.start_node(0, &full_node()).await?;
            cluster.generate(0, 10).await?;
            cluster.start_node(1, &full_node()).await?;
            cluster.connect(1, 0).await?;
            cluster.sync_all().await?;
            cluster.start_node(2, &pruned_node()).await?;
            cluster.connect(1, 2).await?;
            cluster.sync_all().await?;
            cluster.assert_block_counts(&[2011, 2011, 2011]).await?;
            cluster.stop_all().await?;

            // A fresh node syncs from a pruned peer whose tip is recent.
            cluster.start_node(0, &full_node()).await?;
            cluster.start_node(1, &pruned_node()).await?;
            cluster.connect(0, 1).await?;
            cluster.generate(0, 10).await?;
            cluster.start_node(2, &full_node()).await?;
            cluster.connect(2, 1).await?;
            cluster.sync_all().await?;
            cluster.assert_block_counts(&[2021, 2021, 2021]).await?;
            cluster.stop_all().await?;

            // Node 2's clock runs a day ahead, so the pruned peer's tip
            // looks stale and node 2 must not sync from it.
            cluster.start_node(0, &full_node()).await?;
            cluster.start_node(1, &pruned_node()).await?;
            cluster.connect(0, 1).await?;
            cluster.generate(0, 10).await?;
            cluster.sync_nodes(&[0, 1]).await?;
            cluster.start_node(2, &full_node()).await?;
            cluster
                .set_mock_time(2, skewed_now(ONE_DAY_AND_A_SECOND))
                .await?;
            cluster.connect(2, 1).await?;
            let snapshot = cluster
                .wait_then_snapshot(&[0, 1, 2], NO_SYNC_WINDOW)
                .await?;
            snapshot.assert_heights(&[2031, 2031, 2021])?;
            cluster.stop_all().await?;

            // Same skew, but a full peer serves old blocks regardless.
            cluster.start_node(0, &full_node()).await?;
            cluster.start_node(1, &pruned_node()).await?;
            cluster.connect(0, 1).await?;
            cluster.generate(0, 1).await?;
            cluster.start_node(2, &full_node()).await?;
            cluster
                .set_mock_time(2, skewed_now(ONE_DAY_AND_A_SECOND))
                .await?;
            cluster.connect(2, 0).await?;
            let snapshot = cluster.sync_all().await?;
            snapshot.assert_heights(&[2032, 2032, 2032])?;
            cluster.stop_all().await?;
            Ok(())
        })
    })
    .await
    .expect("IBD scenario failed");
}

#[tokio::test]
#[ignore = "Requires a node binary (set NODE_BINARY) - run with --ignored"]
async fn test_three_node_mesh_converges() {
    run_scenario(scenario_config(1), |cluster| {
        Box::pin(async move {
            cluster
                .start_nodes(&[full_node(), full_node(), full_node()])
                .await?;
            cluster.interconnect_all().await?;
            for index in 0..3 {
                cluster.wait_for_handshake(index).await?;
            }

            let before = cluster.block_counts(&[0]).await?.heights()[0];
            cluster.generate(0, 10).await?;
            let snapshot = cluster.sync_all().await?;
            snapshot.assert_heights(&[before + 10; 3])?;
            cluster.assert_same_tip(&[0, 1, 2]).await?;
            Ok(())
        })
    })
    .await
    .expect("mesh scenario failed");
}
