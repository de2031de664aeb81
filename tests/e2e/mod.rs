//! End-to-end scenarios against real node processes.
//!
//! Every test here needs a node binary named by `NODE_BINARY` and is
//! ignored by default:
//!
//! ```text
//! NODE_BINARY=/path/to/bitcoind cargo test --test e2e -- --ignored
//! ```
//!
//! Each test uses its own port seed so the scenarios may run in parallel.

mod ibd;
mod lifecycle;
mod tweak;

use regtest_harness::HarnessConfig;

/// Options given to every node in these scenarios.
pub fn full_node() -> Vec<String> {
    vec!["-debug=".to_string()]
}

/// Options for a pruned node.
pub fn pruned_node() -> Vec<String> {
    vec!["-debug=".to_string(), "-prune=1000".to_string()]
}

/// Harness configuration with a per-test port seed.
pub fn scenario_config(seed_offset: u32) -> HarnessConfig {
    let base = HarnessConfig::from_env();
    HarnessConfig {
        port_seed: base.port_seed.wrapping_add(seed_offset),
        sync_timeout_secs: 120,
        ..base
    }
}
