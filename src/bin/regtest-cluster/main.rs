//! regtest-cluster CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use regtest_harness::{ChainSnapshot, Cluster, HarnessConfig};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Endpoints of one running node.
#[derive(Debug, Serialize)]
struct NodeEntry {
    index: usize,
    p2p: String,
    rpc: String,
    data_dir: PathBuf,
    options: Vec<String>,
}

/// What a client needs to talk to the cluster.
#[derive(Debug, Serialize)]
struct ClusterManifest {
    binary: PathBuf,
    rpc_user: String,
    rpc_password: String,
    data_root: PathBuf,
    nodes: Vec<NodeEntry>,
    heights: ChainSnapshot,
    created_at: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::from_env(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level(&config.log_level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("regtest-cluster v{}", env!("CARGO_PKG_VERSION"));
    if let Some(binary) = &cli.binary {
        config.binary.clone_from(binary);
    }
    if let Some(dir) = &cli.data_dir {
        config.data_root.clone_from(dir);
    }
    if cli.keep_data {
        config.cleanup_data_dir = false;
    }

    let mut cluster = Cluster::new(config).await?;
    let result = bring_up(&mut cluster, &cli).await;
    if let Err(e) = result {
        warn!("Cluster failed to come up: {}", e);
        cluster.teardown().await?;
        return Err(e);
    }

    info!("Cluster running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    cluster.teardown().await?;
    Ok(())
}

async fn bring_up(cluster: &mut Cluster, cli: &Cli) -> color_eyre::Result<()> {
    let options: Vec<Vec<String>> = (0..cli.nodes).map(|i| cli.node_options(i)).collect();
    cluster.initialize_chain_clean(cli.nodes).await?;
    cluster.start_nodes(&options).await?;
    cluster.interconnect_all().await?;

    if cli.generate > 0 {
        cluster.generate(0, cli.generate).await?;
        cluster.sync_all().await?;
    }

    let indices: Vec<usize> = (0..cli.nodes).collect();
    let heights = cluster.block_counts(&indices).await?;
    let nodes = cluster
        .running()
        .into_iter()
        .map(|node| NodeEntry {
            index: node.index(),
            p2p: node.p2p_addr().to_string(),
            rpc: node.rpc_addr().to_string(),
            data_dir: node.data_dir().to_path_buf(),
            options: node.options().to_vec(),
        })
        .collect();

    let config = cluster.config();
    let manifest = ClusterManifest {
        binary: config.binary.clone(),
        rpc_user: config.rpc_user.clone(),
        rpc_password: config.rpc_password.clone(),
        data_root: config.data_root.clone(),
        nodes,
        heights,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let json = serde_json::to_string_pretty(&manifest)?;
    if let Some(path) = &cli.manifest {
        tokio::fs::write(path, &json).await?;
        info!("Wrote manifest to {}", path.display());
    } else {
        println!("{json}");
    }
    Ok(())
}
