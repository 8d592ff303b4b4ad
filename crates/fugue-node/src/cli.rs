//! CLI argument parsing for the fugue node

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::NodeConfig;

/// Fugue synchronization node
#[derive(Parser, Debug, Clone)]
#[command(name = "fugue")]
#[command(about = "Fugue peer-to-peer synchronization node")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// P2P listen address
    #[arg(long)]
    pub p2p_addr: Option<SocketAddr>,

    /// Address announced to peers
    #[arg(long)]
    pub public_addr: Option<SocketAddr>,

    /// Bootstrap peers (comma-separated, e.g. "0xab..@1.2.3.4:31234,0xcd..@5.6.7.8:31234")
    #[arg(long, default_value = "")]
    pub seeds: String,

    /// Node private key (hex)
    #[arg(long)]
    pub private_key: Option<String>,

    /// Signed protocol version token issued by the network operator
    #[arg(long)]
    pub app_protocol_version: Option<String>,

    /// Version signed by the development issuer when no token is set
    #[arg(long)]
    pub protocol_version: Option<u32>,

    /// Sign this protocol version with --private-key, print its token and exit
    #[arg(long, value_name = "VERSION")]
    pub issue_protocol_version: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply flags on top of a file configuration
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(addr) = self.p2p_addr {
            config.p2p.listen_addr = addr;
        }
        if let Some(addr) = self.public_addr {
            config.p2p.public_addr = Some(addr);
        }
        let seeds: Vec<String> = self
            .seeds
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if !seeds.is_empty() {
            config.p2p.seeds = seeds;
        }
        if let Some(key) = &self.private_key {
            config.p2p.private_key = Some(key.clone());
        }
        if let Some(token) = &self.app_protocol_version {
            config.p2p.app_protocol_version = Some(token.clone());
        }
        if let Some(version) = self.protocol_version {
            config.p2p.protocol_version = version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["fugue"]);
        assert!(cli.config.is_none());
        assert!(cli.p2p_addr.is_none());
        assert!(cli.issue_protocol_version.is_none());
        assert_eq!(cli.seeds, "");
        assert_eq!(cli.log_level, "info");
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_flags_override_file() {
        let cli = Cli::parse_from([
            "fugue",
            "--p2p-addr", "127.0.0.1:5000",
            "--seeds", "0x01@127.0.0.1:1, 0x02@127.0.0.1:2",
            "--protocol-version", "7",
            "--app-protocol-version", "abcd",
            "--log-level", "debug",
        ]);
        let mut config = NodeConfig::default();
        config.p2p.seeds = vec!["0x03@127.0.0.1:3".into()];
        cli.apply(&mut config);

        assert_eq!(config.p2p.listen_addr.to_string(), "127.0.0.1:5000");
        assert_eq!(config.p2p.seeds, vec!["0x01@127.0.0.1:1", "0x02@127.0.0.1:2"]);
        assert_eq!(config.p2p.protocol_version, 7);
        assert_eq!(config.p2p.app_protocol_version.as_deref(), Some("abcd"));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_empty_seed_flag_keeps_file_seeds() {
        let cli = Cli::parse_from(["fugue"]);
        let mut config = NodeConfig::default();
        config.p2p.seeds = vec!["0x03@127.0.0.1:3".into()];
        cli.apply(&mut config);
        assert_eq!(config.p2p.seeds.len(), 1);
    }
}
