use ordlink_core::{Block, Hash};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::error::OrdererError;

/// In-memory chain of one channel. Appends announce the new height.
pub struct BlockLedger {
    blocks: RwLock<Vec<Block>>,
    heights: broadcast::Sender<u64>,
}

impl BlockLedger {
    pub fn new() -> Self {
        let (heights, _) = broadcast::channel(256);
        BlockLedger {
            blocks: RwLock::new(Vec::new()),
            heights,
        }
    }

    /// Append `block`, which must be the next block and link to the head
    pub async fn append(&self, block: Block) -> Result<u64, OrdererError> {
        let mut blocks = self.blocks.write().await;
        let height = blocks.len() as u64;

        if block.number() != height {
            return Err(OrdererError::NonContiguous {
                height,
                got: block.number(),
            });
        }

        let expected_previous = match blocks.last() {
            Some(head) => head.hash()?,
            None => Hash::ZERO,
        };
        if block.header.previous_hash != expected_previous {
            return Err(OrdererError::BrokenChain(block.number()));
        }

        blocks.push(block);
        let height = height + 1;
        drop(blocks);

        if let Ok(count) = self.heights.send(height) {
            debug!("Announced height {} to {} streams", height, count);
        }
        Ok(height)
    }

    pub async fn height(&self) -> u64 {
        self.blocks.read().await.len() as u64
    }

    pub async fn get(&self, number: u64) -> Option<Block> {
        self.blocks.read().await.get(number as usize).cloned()
    }

    pub async fn head_hash(&self) -> Result<Option<Hash>, OrdererError> {
        match self.blocks.read().await.last() {
            Some(head) => Ok(Some(head.hash()?)),
            None => Ok(None),
        }
    }

    /// New heights, announced after each append
    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.heights.subscribe()
    }
}

impl Default for BlockLedger {
    fn default() -> Self {
        Self::new()
    }
}
