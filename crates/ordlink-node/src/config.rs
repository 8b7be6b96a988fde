use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{anyhow, Result};
use ordlink_core::{KeyPair, PublicKey};
use ordlink_deliver::{DeliverConfig, Endpoint};
use serde::{Deserialize, Serialize};

/// Configuration of `ordlink follow`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    pub channel_id: String,

    /// Ordering endpoints of the channel
    pub endpoints: Vec<Endpoint>,

    /// Consenter public keys (hex)
    pub consenters: Vec<String>,

    /// Signatures needed per block; defaults to f+1 of the consenters
    #[serde(default)]
    pub quorum: Option<usize>,

    /// Client secret key (hex); a fresh key is used when absent
    #[serde(default)]
    pub signer_key: Option<String>,

    /// Blocks already held locally; delivery starts at this number
    #[serde(default)]
    pub start_height: u64,

    #[serde(default)]
    pub deliver: DeliverConfig,
}

/// Configuration of `ordlink cluster`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub channel_id: String,

    /// Bind address of every node
    pub host: IpAddr,

    /// Node `i` listens on `base_port + i`
    pub base_port: u16,

    /// One consenter secret key (hex) per node
    pub consenter_keys: Vec<String>,

    /// Block production interval in milliseconds
    pub round_time_ms: u64,

    pub txs_per_block: usize,

    /// Reject seeks not bound to the presented client certificate
    #[serde(default)]
    pub require_tls_binding: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            channel_id: "ordlink-channel".to_string(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 7050,
            consenter_keys: Vec::new(),
            round_time_ms: 1000,
            txs_per_block: 10,
            require_tls_binding: false,
        }
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}

impl FollowConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn consenter_keys(&self) -> Result<Vec<PublicKey>> {
        self.consenters
            .iter()
            .map(|s| PublicKey::from_hex(s).map_err(|e| anyhow!("consenter {}: {}", s, e)))
            .collect()
    }

    pub fn signer_keypair(&self) -> Result<KeyPair> {
        match &self.signer_key {
            Some(hex) => Ok(KeyPair::from_secret_hex(hex)?),
            None => Ok(KeyPair::generate()),
        }
    }
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn node_count(&self) -> usize {
        self.consenter_keys.len()
    }

    pub fn consenters(&self) -> Result<Vec<KeyPair>> {
        self.consenter_keys
            .iter()
            .map(|hex| KeyPair::from_secret_hex(hex).map_err(|e| anyhow!(e)))
            .collect()
    }

    pub fn node_addr(&self, index: usize) -> Result<SocketAddr> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|i| self.base_port.checked_add(i))
            .ok_or_else(|| anyhow!("no port for node {}", index))?;
        Ok(SocketAddr::new(self.host, port))
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        (0..self.node_count())
            .map(|i| self.node_addr(i).map(|addr| Endpoint::new(addr.to_string())))
            .collect()
    }

    /// Follow configuration pointing at this cluster
    pub fn follow_config(&self) -> Result<FollowConfig> {
        Ok(FollowConfig {
            channel_id: self.channel_id.clone(),
            endpoints: self.endpoints()?,
            consenters: self
                .consenters()?
                .iter()
                .map(|k| k.public.to_hex())
                .collect(),
            quorum: None,
            signer_key: Some(KeyPair::generate().secret.to_hex()),
            start_height: 0,
            deliver: DeliverConfig::default(),
        })
    }
}

/// Sample four-node cluster, the smallest that tolerates one faulty node
pub fn generate_sample_cluster() -> ClusterConfig {
    ClusterConfig {
        consenter_keys: (0..4).map(|_| KeyPair::generate().secret.to_hex()).collect(),
        ..ClusterConfig::default()
    }
}
