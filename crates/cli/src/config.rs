//! Node configuration: a TOML file merged with CLI flag overrides.

use clap::Parser;
use corelib::node::{NodeId, NodeSize};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "paranode", about = "distributed key-value storage node")]
pub struct CliArgs {
    /// TOML config file; CLI flags below override values it sets.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub node_id: Option<String>,

    #[arg(long)]
    pub bind: Option<SocketAddr>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    #[arg(long)]
    pub tls_ca: Option<PathBuf>,

    /// Repeatable `node_id@host:port`; the cluster's seed set.
    #[arg(long = "seed")]
    pub seeds: Vec<String>,

    #[arg(long)]
    pub node_size: Option<String>,

    #[arg(long)]
    pub gossip_interval_ms: Option<u64>,

    #[arg(long)]
    pub gossip_fanout: Option<usize>,

    #[arg(long)]
    pub partition_shift: Option<u32>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    node_id: Option<String>,
    bind: Option<SocketAddr>,
    data_dir: Option<PathBuf>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    tls_ca: Option<PathBuf>,
    #[serde(default)]
    seeds: Vec<String>,
    node_size: Option<String>,
    gossip_interval_ms: Option<u64>,
    gossip_fanout: Option<usize>,
    partition_shift: Option<u32>,
}

/// A seed peer as `node_id@host:port`.
#[derive(Clone, Debug)]
pub struct Seed {
    pub node_id: NodeId,
    pub address: String,
}

pub struct NodeConfig {
    pub node_id: NodeId,
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub tls_ca: PathBuf,
    pub seeds: Vec<Seed>,
    pub node_size: NodeSize,
    pub gossip_interval_ms: u64,
    pub gossip_fanout: usize,
    pub partition_shift: u32,
}

impl NodeConfig {
    pub fn load(args: CliArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {path:?}: {e}"))?;
                toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing config file {path:?}: {e}"))?
            }
            None => FileConfig::default(),
        };

        let node_id = args
            .node_id
            .or(file.node_id)
            .ok_or_else(|| anyhow::anyhow!("node_id must be set via --node-id or config file"))?;
        let bind = args
            .bind
            .or(file.bind)
            .ok_or_else(|| anyhow::anyhow!("bind must be set via --bind or config file"))?;
        let data_dir = args
            .data_dir
            .or(file.data_dir)
            .ok_or_else(|| anyhow::anyhow!("data_dir must be set via --data-dir or config file"))?;
        let tls_cert = args
            .tls_cert
            .or(file.tls_cert)
            .ok_or_else(|| anyhow::anyhow!("tls_cert must be set via --tls-cert or config file"))?;
        let tls_key = args
            .tls_key
            .or(file.tls_key)
            .ok_or_else(|| anyhow::anyhow!("tls_key must be set via --tls-key or config file"))?;
        let tls_ca = args
            .tls_ca
            .or(file.tls_ca)
            .ok_or_else(|| anyhow::anyhow!("tls_ca must be set via --tls-ca or config file"))?;

        let raw_seeds = if args.seeds.is_empty() { file.seeds } else { args.seeds };
        let seeds = raw_seeds
            .into_iter()
            .map(|s| parse_seed(&s))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let node_size_str = args.node_size.or(file.node_size).unwrap_or_else(|| "m".to_string());
        let node_size = NodeSize::from_str(&node_size_str)
            .ok_or_else(|| anyhow::anyhow!("invalid node_size {node_size_str:?}"))?;

        Ok(Self {
            node_id: NodeId::new(node_id),
            bind,
            data_dir,
            tls_cert,
            tls_key,
            tls_ca,
            seeds,
            node_size,
            gossip_interval_ms: args.gossip_interval_ms.or(file.gossip_interval_ms).unwrap_or(1000),
            gossip_fanout: args.gossip_fanout.or(file.gossip_fanout).unwrap_or(3),
            partition_shift: args.partition_shift.or(file.partition_shift).unwrap_or(8),
        })
    }

    pub fn is_seed(&self) -> bool {
        self.seeds.is_empty() || self.seeds.iter().any(|s| s.node_id == self.node_id)
    }
}

fn parse_seed(raw: &str) -> anyhow::Result<Seed> {
    let (node_id, address) = raw
        .split_once('@')
        .ok_or_else(|| anyhow::anyhow!("seed {raw:?} must be formatted as node_id@host:port"))?;
    Ok(Seed {
        node_id: NodeId::new(node_id),
        address: address.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seed_splits_node_id_and_address() {
        let seed = parse_seed("n1@127.0.0.1:9000").unwrap();
        assert_eq!(seed.node_id, NodeId::new("n1"));
        assert_eq!(seed.address, "127.0.0.1:9000");
    }

    #[test]
    fn parse_seed_rejects_missing_separator() {
        assert!(parse_seed("n1-127.0.0.1:9000").is_err());
    }

    #[test]
    fn is_seed_true_when_seed_list_is_empty() {
        let cfg = NodeConfig {
            node_id: NodeId::new("n1"),
            bind: "127.0.0.1:9000".parse().unwrap(),
            data_dir: PathBuf::from("/tmp"),
            tls_cert: PathBuf::from("cert"),
            tls_key: PathBuf::from("key"),
            tls_ca: PathBuf::from("ca"),
            seeds: vec![],
            node_size: NodeSize::M,
            gossip_interval_ms: 1000,
            gossip_fanout: 3,
            partition_shift: 8,
        };
        assert!(cfg.is_seed());
    }
}
