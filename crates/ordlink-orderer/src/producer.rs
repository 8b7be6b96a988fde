use std::sync::Arc;
use std::time::Duration;

use ordlink_core::{Block, BlockData, KeyPair};
use rand::RngCore;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::OrdererError;
use crate::ledger::BlockLedger;

/// Stands in for BFT consensus on a local cluster: every round one block is
/// built, signed by all consenters, and appended to every node's ledger.
pub struct ClusterProducer {
    consenters: Vec<KeyPair>,
    ledgers: Vec<Arc<BlockLedger>>,
    round_time: Duration,
    txs_per_block: usize,
}

impl ClusterProducer {
    pub fn new(
        consenters: Vec<KeyPair>,
        ledgers: Vec<Arc<BlockLedger>>,
        round_time: Duration,
        txs_per_block: usize,
    ) -> Self {
        ClusterProducer {
            consenters,
            ledgers,
            round_time,
            txs_per_block,
        }
    }

    /// Build, sign and publish the next block
    pub async fn produce_block(&self) -> Result<Block, OrdererError> {
        let reference = self
            .ledgers
            .first()
            .ok_or_else(|| OrdererError::Internal("cluster has no ledgers".to_string()))?;

        let height = reference.height().await;
        let previous = match height.checked_sub(1) {
            Some(head) => reference.get(head).await.map(|b| b.header),
            None => None,
        };

        let transactions = {
            let mut rng = rand::thread_rng();
            (0..self.txs_per_block)
                .map(|_| {
                    let mut tx = vec![0u8; 32];
                    rng.fill_bytes(&mut tx);
                    tx
                })
                .collect()
        };

        let mut block = Block::build(previous.as_ref(), BlockData { transactions })?;
        for consenter in &self.consenters {
            block.sign_as_orderer(&consenter.secret)?;
        }

        for (index, ledger) in self.ledgers.iter().enumerate() {
            if let Err(e) = ledger.append(block.clone()).await {
                warn!("Node {} rejected block {}: {}", index, block.number(), e);
            }
        }

        Ok(block)
    }

    /// Run the production loop until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut round = interval(self.round_time);

        info!(
            "Starting block production with round time {:?} and {} consenters",
            self.round_time,
            self.consenters.len()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = round.tick() => {}
            }

            match self.produce_block().await {
                Ok(block) => info!(
                    "Produced block {} with {} transactions",
                    block.number(),
                    self.txs_per_block
                ),
                Err(e) => error!("Failed to produce block: {}", e),
            }
        }

        info!("Block production stopped");
    }
}
