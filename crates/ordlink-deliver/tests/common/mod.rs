//! In-memory ordering cluster for delivery client tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use ordlink_core::{
    Block, BlockData, DeliverResponse, KeyPair, PublicKey, SeekContent, SeekEnvelope, SeekPosition,
};
use ordlink_deliver::{
    DeliverConfig, DeliverError, DeliverServices, DeliverStream, DeliveryClient, Dialer, Endpoint,
    KeyPairSigner, LedgerInfo, OrdererConnection, QuorumVerifier, StaticConnectionSource,
};
use parking_lot::Mutex;
use tokio::sync::watch;

pub const CHANNEL: &str = "test-chain";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ordlink_deliver=debug")
        .with_test_writer()
        .try_init();
}

/// Ledger stub with a settable height
pub struct MemLedger(AtomicU64);

impl MemLedger {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(MemLedger(AtomicU64::new(height)))
    }
}

impl LedgerInfo for MemLedger {
    fn current_height(&self) -> Result<u64, DeliverError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct OrdererState {
    blocks: Vec<Block>,
    withholding: bool,
    down: bool,
    /// Bumped to drop every open stream
    epoch: u64,
    seeks: Vec<(SeekContent, u64)>,
}

/// One mock ordering node
pub struct MockOrderer {
    pub address: String,
    state: Mutex<OrdererState>,
    changed: watch::Sender<u64>,
}

impl MockOrderer {
    fn new(address: String) -> Arc<Self> {
        let (changed, _) = watch::channel(0);
        Arc::new(MockOrderer {
            address,
            state: Mutex::new(OrdererState::default()),
            changed,
        })
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version += 1);
    }

    pub fn append(&self, block: Block) {
        self.state.lock().blocks.push(block);
        self.notify();
    }

    /// Stop sending full blocks; header streams keep flowing
    pub fn set_withholding(&self, withholding: bool) {
        self.state.lock().withholding = withholding;
        self.notify();
    }

    /// Refuse new connections and end every open stream
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.down = true;
        state.epoch += 1;
        drop(state);
        self.notify();
    }

    pub fn restart(&self) {
        self.state.lock().down = false;
        self.notify();
    }

    pub fn height(&self) -> u64 {
        self.state.lock().blocks.len() as u64
    }

    /// Number of seeks received for `content`
    pub fn seek_count(&self, content: SeekContent) -> usize {
        self.state
            .lock()
            .seeks
            .iter()
            .filter(|(c, _)| *c == content)
            .count()
    }

    /// Start block of every seek received for `content`
    pub fn seek_starts(&self, content: SeekContent) -> Vec<u64> {
        self.state
            .lock()
            .seeks
            .iter()
            .filter(|(c, _)| *c == content)
            .map(|(_, start)| *start)
            .collect()
    }

    fn open(self: &Arc<Self>, envelope: SeekEnvelope) -> Result<DeliverStream, DeliverError> {
        let payload = envelope.open()?;
        let content = payload.seek.content;
        let start = match payload.seek.start {
            SeekPosition::Oldest => 0,
            SeekPosition::Specified(n) => n,
            SeekPosition::Newest => self.height().saturating_sub(1),
        };

        let epoch = {
            let mut state = self.state.lock();
            if state.down {
                return Err(DeliverError::Transport(format!("{} is down", self.address)));
            }
            state.seeks.push((content, start));
            state.epoch
        };

        let init = (Arc::clone(self), self.changed.subscribe(), start);
        let messages = stream::unfold(init, move |(orderer, mut changed, next)| async move {
            loop {
                changed.borrow_and_update();
                let ready = {
                    let state = orderer.state.lock();
                    if state.down || state.epoch != epoch {
                        return None;
                    }
                    let blocked = content == SeekContent::Block && state.withholding;
                    match state.blocks.get(next as usize) {
                        Some(block) if !blocked => Some(block.clone()),
                        _ => None,
                    }
                };

                if let Some(block) = ready {
                    let message = match content {
                        SeekContent::Block => block,
                        SeekContent::HeaderWithSig => block.header_only(),
                    };
                    return Some((
                        Ok::<_, DeliverError>(DeliverResponse::Block(message)),
                        (orderer, changed, next + 1),
                    ));
                }

                if changed.changed().await.is_err() {
                    return None;
                }
            }
        });

        Ok(messages.boxed())
    }
}

struct MockConnection {
    orderer: Arc<MockOrderer>,
}

#[async_trait]
impl OrdererConnection for MockConnection {
    async fn deliver(&self, envelope: SeekEnvelope) -> Result<DeliverStream, DeliverError> {
        self.orderer.open(envelope)
    }
}

/// A set of mock orderers sharing one chain and one consenter set
pub struct MockCluster {
    pub orderers: Vec<Arc<MockOrderer>>,
    by_address: HashMap<String, Arc<MockOrderer>>,
    consenters: Vec<KeyPair>,
    chain: Mutex<Vec<Block>>,
}

impl MockCluster {
    pub fn new(size: usize) -> Arc<Self> {
        let orderers: Vec<_> = (0..size)
            .map(|i| MockOrderer::new(format!("orderer{}:7050", i)))
            .collect();
        let by_address = orderers
            .iter()
            .map(|o| (o.address.clone(), Arc::clone(o)))
            .collect();

        Arc::new(MockCluster {
            orderers,
            by_address,
            consenters: (0..size).map(|_| KeyPair::generate()).collect(),
            chain: Mutex::new(Vec::new()),
        })
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.orderers.iter().map(|o| Endpoint::new(o.address.clone())).collect()
    }

    pub fn consenter_keys(&self) -> Vec<PublicKey> {
        self.consenters.iter().map(|k| k.public).collect()
    }

    pub fn orderer(&self, address: &str) -> Arc<MockOrderer> {
        Arc::clone(&self.by_address[address])
    }

    /// Build and sign the next block without publishing it
    pub fn next_block(&self) -> Block {
        let chain = self.chain.lock();
        let data = BlockData {
            transactions: vec![format!("tx-{}", chain.len()).into_bytes()],
        };
        let mut block = Block::build(chain.last().map(|b| &b.header), data).unwrap();
        for consenter in &self.consenters {
            block.sign_as_orderer(&consenter.secret).unwrap();
        }
        block
    }

    /// Extend the chain on every orderer
    pub fn produce(&self, count: usize) {
        for _ in 0..count {
            let block = self.next_block();
            self.chain.lock().push(block.clone());
            for orderer in &self.orderers {
                orderer.append(block.clone());
            }
        }
    }

    /// Extend the chain without publishing it anywhere
    pub fn produce_unpublished(&self, count: usize) -> Vec<Block> {
        (0..count)
            .map(|_| {
                let block = self.next_block();
                self.chain.lock().push(block.clone());
                block
            })
            .collect()
    }
}

#[async_trait]
impl Dialer for MockCluster {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn OrdererConnection>, DeliverError> {
        let orderer = self
            .by_address
            .get(&endpoint.address)
            .ok_or_else(|| DeliverError::Dial {
                address: endpoint.address.clone(),
                reason: "unknown orderer".to_string(),
            })?;

        if orderer.state.lock().down {
            return Err(DeliverError::Dial {
                address: endpoint.address.clone(),
                reason: "connection refused".to_string(),
            });
        }

        Ok(Box::new(MockConnection {
            orderer: Arc::clone(orderer),
        }))
    }
}

pub struct Harness {
    pub cluster: Arc<MockCluster>,
    pub source: Arc<StaticConnectionSource>,
    pub client: DeliveryClient,
}

impl Harness {
    pub fn start(size: usize, height: u64, config: DeliverConfig) -> Self {
        Self::start_with(MockCluster::new(size), height, config)
    }

    pub fn start_with(cluster: Arc<MockCluster>, height: u64, config: DeliverConfig) -> Self {
        let endpoints = cluster.endpoints();
        Self::start_with_endpoints(cluster, endpoints, height, config)
    }

    /// Start with only `endpoints` advertised by the connection source
    pub fn start_with_endpoints(
        cluster: Arc<MockCluster>,
        endpoints: Vec<Endpoint>,
        height: u64,
        config: DeliverConfig,
    ) -> Self {
        init_tracing();
        let source = Arc::new(StaticConnectionSource::new(endpoints));
        let services = DeliverServices {
            ledger: MemLedger::new(height),
            verifier: Arc::new(QuorumVerifier::with_bft_threshold(&cluster.consenter_keys())),
            signer: Arc::new(KeyPairSigner::generate()),
            dialer: cluster.clone(),
            source: source.clone(),
        };
        let client = DeliveryClient::start(CHANNEL, config, services).unwrap();

        Harness {
            cluster,
            source,
            client,
        }
    }

    pub fn primary(&self) -> Arc<MockOrderer> {
        let endpoint = self.client.get_endpoint().expect("client has a primary");
        self.cluster.orderer(&endpoint.address)
    }

    /// Receive and acknowledge one block
    pub async fn consume(&self) -> Block {
        let block = tokio::time::timeout(Duration::from_secs(10), self.client.recv())
            .await
            .expect("recv timed out")
            .expect("recv failed");
        self.client.update_received(block.number());
        block
    }
}

/// Poll `check` until it holds or `limit` passes
pub async fn eventually<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
