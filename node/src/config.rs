//! CLI arguments and runtime configuration.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--prune-threshold must be a power of two, got {0}")]
    PruneThresholdNotPowerOfTwo(u32),
    #[error("--prune-blocks must be nonzero when pruning is enabled")]
    PruneBlocksZero,
    #[error("invalid peer address {addr:?}: {source}")]
    InvalidPeerAddr { addr: String, source: std::net::AddrParseError },
    #[error("--peer-limit must be at least 1")]
    PeerLimitZero,
    #[error("--sync-span must be at least 1")]
    SyncSpanZero,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "delegated proof-of-stake sync node", long_about = None)]
pub struct NodeConfig {
    /// Data directory for the block log and index files.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Address to accept inbound peer connections on.
    #[arg(long, default_value = "0.0.0.0:9876")]
    pub p2p_listen: SocketAddr,

    /// Outbound peer to dial at startup. Repeatable.
    #[arg(long = "p2p-peer")]
    pub p2p_peers: Vec<String>,

    /// Chain identity carried in the handshake and the block log header.
    /// Ignored when `--genesis-file` is given; the chain id is then derived
    /// from the genesis bytes instead.
    #[arg(long, default_value = "glint-devnet")]
    pub chain_id: String,

    /// JSON genesis document, validated and canonicalized against the
    /// built-in genesis schema before it becomes the block log's genesis
    /// identity. Absent means start from a bare chain id (`--chain-id`)
    /// with no genesis blob.
    #[arg(long)]
    pub genesis_file: Option<PathBuf>,

    /// Number of trailing blocks to retain once pruning is enabled. Absent
    /// means the log stays dense (never prunes).
    #[arg(long)]
    pub prune_blocks: Option<u32>,

    /// Batch size for the pruning hole-punch, rounded to a power of two.
    #[arg(long, default_value = "1024")]
    pub prune_threshold: u32,

    /// Maximum number of peers considered per sync range request.
    #[arg(long, default_value = "3")]
    pub peer_limit: usize,

    /// Latency tolerance, in milliseconds, before a peer is considered
    /// meaningfully behind/ahead in the handshake transition table.
    #[arg(long, default_value = "1000")]
    pub latency_budget_ms: u32,

    /// Number of blocks requested per sync range.
    #[arg(long, default_value = "1000")]
    pub sync_span: u32,

    /// Heartbeat keepalive interval.
    #[arg(long, default_value = "10")]
    pub keepalive_interval_secs: u64,

    /// Soft cap, in bytes, on a single connection's outbound write queue.
    #[arg(long, default_value = "41943040")]
    pub max_write_queue_bytes: usize,

    /// Convenience override for `RUST_LOG` (`trace`, `debug`, `info`, `warn`, `error`).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl NodeConfig {
    pub fn parse_args() -> Self {
        NodeConfig::parse()
    }

    pub fn block_log_dir(&self) -> PathBuf {
        self.data_dir.join("blocklog")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prune_threshold == 0 || !self.prune_threshold.is_power_of_two() {
            return Err(ConfigError::PruneThresholdNotPowerOfTwo(self.prune_threshold));
        }
        if matches!(self.prune_blocks, Some(0)) {
            return Err(ConfigError::PruneBlocksZero);
        }
        if self.peer_limit == 0 {
            return Err(ConfigError::PeerLimitZero);
        }
        if self.sync_span == 0 {
            return Err(ConfigError::SyncSpanZero);
        }
        for addr in &self.p2p_peers {
            addr.parse::<SocketAddr>()
                .map_err(|source| ConfigError::InvalidPeerAddr { addr: addr.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NodeConfig {
        NodeConfig {
            data_dir: PathBuf::from("./data"),
            p2p_listen: "0.0.0.0:9876".parse().unwrap(),
            p2p_peers: vec![],
            chain_id: "test".to_string(),
            genesis_file: None,
            prune_blocks: None,
            prune_threshold: 1024,
            peer_limit: 3,
            latency_budget_ms: 1000,
            sync_span: 1000,
            keepalive_interval_secs: 10,
            max_write_queue_bytes: 40 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn default_shaped_config_validates() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_threshold_rejected() {
        let mut cfg = base();
        cfg.prune_threshold = 1000;
        assert_eq!(cfg.validate(), Err(ConfigError::PruneThresholdNotPowerOfTwo(1000)));
    }

    #[test]
    fn zero_prune_blocks_rejected() {
        let mut cfg = base();
        cfg.prune_blocks = Some(0);
        assert_eq!(cfg.validate(), Err(ConfigError::PruneBlocksZero));
    }

    #[test]
    fn malformed_peer_address_rejected() {
        let mut cfg = base();
        cfg.p2p_peers.push("not-an-address".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_peer_limit_rejected() {
        let mut cfg = base();
        cfg.peer_limit = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::PeerLimitZero));
    }

    #[test]
    fn block_log_dir_nests_under_data_dir() {
        let cfg = base();
        assert_eq!(cfg.block_log_dir(), PathBuf::from("./data/blocklog"));
    }
}
