//! Restart and teardown behavior of real node processes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{full_node, scenario_config};
use regtest_harness::{run_scenario, Cluster, Error};

#[tokio::test]
#[ignore = "Requires a node binary (set NODE_BINARY) - run with --ignored"]
async fn test_restart_resumes_chain() {
    run_scenario(scenario_config(3), |cluster| {
        Box::pin(async move {
            cluster.start_node(0, &full_node()).await?;
            cluster.generate(0, 25).await?;
            let before = cluster.block_counts(&[0]).await?;

            let node = cluster.restart_node(0, None).await?;
            assert_eq!(node.options(), full_node().as_slice());
            let after = cluster.block_counts(&[0]).await?;
            assert_eq!(before, after);
            Ok(())
        })
    })
    .await
    .expect("restart scenario failed");
}

#[tokio::test]
#[ignore = "Requires a node binary (set NODE_BINARY) - run with --ignored"]
async fn test_teardown_and_stop_are_idempotent() {
    let mut cluster = Cluster::new(scenario_config(4)).await.unwrap();
    cluster.start_nodes(&[full_node(), full_node()]).await.unwrap();

    let node = cluster.node(1).unwrap();
    node.stop().await.unwrap();
    node.stop().await.unwrap();
    assert!(matches!(
        node.block_count().await,
        Err(Error::NodeUnavailable { index: 1 })
    ));

    cluster.stop_node(1).await.unwrap();
    cluster.stop_node(1).await.unwrap();
    assert_eq!(cluster.running().len(), 1);

    cluster.teardown().await.unwrap();
    cluster.teardown().await.unwrap();
    assert!(cluster.running().is_empty());
}

#[tokio::test]
#[ignore = "Requires a node binary (set NODE_BINARY) - run with --ignored"]
async fn test_double_start_rejected() {
    run_scenario(scenario_config(5), |cluster| {
        Box::pin(async move {
            cluster.start_node(0, &full_node()).await?;
            let again = cluster.start_node(0, &full_node()).await;
            assert!(matches!(again, Err(Error::Config(_))));
            Ok(())
        })
    })
    .await
    .expect("double start scenario failed");
}
