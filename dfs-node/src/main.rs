//! dfs storage node binary.
//!
//! Composes the local store and the peer transport into a running node.

use tracing_subscriber::EnvFilter;

use dfs_node::cli::Cli;
use dfs_node::config::NodeConfig;
use dfs_node::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("dfs node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_cli(&cli);

    let node = Node::new(config)?;
    node.run().await?;

    Ok(())
}
