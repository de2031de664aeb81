//! Runtime tweak queries on a live node.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{full_node, scenario_config};
use regtest_harness::run_scenario;
use regtest_harness::tweak::{check_full_dump_equivalence, check_prefix_query};
use serde_json::json;

#[tokio::test]
#[ignore = "Requires a node binary (set NODE_BINARY) - run with --ignored"]
async fn test_tweak_set_get_and_wildcards() {
    run_scenario(scenario_config(2), |cluster| {
        Box::pin(async move {
            let node = cluster.start_node(0, &full_node()).await?;
            let rpc = node.rpc().await?;

            rpc.set_tweak("mining.comment", "slartibartfast dug here")
                .await?;
            rpc.set_tweak("mining.comment", "slartibartfast dug here")
                .await?;
            let data = rpc.get_tweaks(Some("mining.comment")).await?;
            assert_eq!(
                data.get("mining.comment"),
                Some(&json!("slartibartfast dug here"))
            );

            check_prefix_query(rpc, "net.").await?;
            let dump = check_full_dump_equivalence(rpc).await?;
            assert!(dump.contains_key("mining.comment"));
            Ok(())
        })
    })
    .await
    .expect("tweak scenario failed");
}
