use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Network address of one ordering node.
///
/// Identity is the address; trusted roots travel with it so a dialer can
/// build a TLS client per endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    #[serde(default)]
    pub root_certs: Vec<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Endpoint {
            address: address.into(),
            root_certs: Vec::new(),
        }
    }

    pub fn with_root_certs(address: impl Into<String>, root_certs: Vec<String>) -> Self {
        Endpoint {
            address: address.into(),
            root_certs,
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Supplies the current ordering endpoints of a channel
pub trait ConnectionSource: Send + Sync {
    fn endpoints(&self, channel_id: &str) -> Vec<Endpoint>;
}

/// In-memory endpoint set, refreshable when cluster membership changes
#[derive(Default)]
pub struct StaticConnectionSource {
    global: RwLock<Vec<Endpoint>>,
    per_channel: RwLock<HashMap<String, Vec<Endpoint>>>,
}

impl StaticConnectionSource {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        StaticConnectionSource {
            global: RwLock::new(dedup(endpoints)),
            per_channel: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the endpoints used by channels without an override
    pub fn update(&self, endpoints: Vec<Endpoint>) {
        *self.global.write() = dedup(endpoints);
    }

    /// Set endpoints for one channel
    pub fn update_channel(&self, channel_id: &str, endpoints: Vec<Endpoint>) {
        self.per_channel
            .write()
            .insert(channel_id.to_string(), dedup(endpoints));
    }
}

impl ConnectionSource for StaticConnectionSource {
    fn endpoints(&self, channel_id: &str) -> Vec<Endpoint> {
        if let Some(endpoints) = self.per_channel.read().get(channel_id) {
            return endpoints.clone();
        }
        self.global.read().clone()
    }
}

fn dedup(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut unique: Vec<Endpoint> = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        if !unique.contains(&endpoint) {
            unique.push(endpoint);
        }
    }
    unique
}
