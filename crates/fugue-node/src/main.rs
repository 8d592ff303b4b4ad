//! Fugue node binary
//!
//! Runs peer discovery and block, transaction, evidence and consensus
//! synchronization over TCP.

mod cli;
mod config;
mod node;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cli::Cli;
use config::{protocol_token, NodeConfig};
use fugue_network::AppProtocolVersion;
use node::Node;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading config from {:?}", path);
            NodeConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => NodeConfig::default(),
    };
    cli.apply(&mut config);

    if let Some(version) = cli.issue_protocol_version {
        if config.p2p.private_key.is_none() {
            bail!("--issue-protocol-version needs the issuer's --private-key");
        }
        let issued = AppProtocolVersion::sign(&config.p2p.key()?, version, Vec::new())?;
        println!("{}", protocol_token(&issued)?);
        return Ok(());
    }

    let node = Arc::new(Node::new(config).await?);

    let stopper = Arc::clone(&node);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        stopper.stop();
    });

    node.run().await?;
    Ok(())
}

/// `RUST_LOG` wins over `--log-level`
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
