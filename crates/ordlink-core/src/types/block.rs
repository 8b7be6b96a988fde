use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, merkle_root, sign, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;

/// Block header. This is what header-only streams carry and what orderers sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Sequence number (0 for genesis)
    pub number: u64,
    /// Hash of the previous header (zeros for genesis)
    pub previous_hash: Hash,
    /// Merkle root of the block's transactions
    pub data_hash: Hash,
}

impl BlockHeader {
    /// Compute the hash of this header
    pub fn hash(&self) -> Result<Hash, CoreError> {
        let bytes = serialize::to_bytes(self)?;
        Ok(hash_blake3(&bytes))
    }
}

/// Block payload, opaque to delivery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub transactions: Vec<Vec<u8>>,
}

impl BlockData {
    pub fn compute_hash(&self) -> Hash {
        let leaves: Vec<Hash> = self.transactions.iter().map(|tx| hash_blake3(tx)).collect();
        merkle_root(&leaves)
    }
}

/// A consenter's signature over a block header hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdererSignature {
    pub signer: PublicKey,
    pub signature: Sig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub signatures: Vec<OrdererSignature>,
}

/// A block as delivered by an ordering node. `data` is `None` on
/// header-with-signature streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Option<BlockData>,
    pub metadata: BlockMetadata,
}

impl Block {
    /// Build the next block on top of `previous` (or genesis when `None`)
    pub fn build(previous: Option<&BlockHeader>, data: BlockData) -> Result<Self, CoreError> {
        let (number, previous_hash) = match previous {
            Some(header) => (header.number + 1, header.hash()?),
            None => (0, Hash::ZERO),
        };

        Ok(Block {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash: data.compute_hash(),
            },
            data: Some(data),
            metadata: BlockMetadata::default(),
        })
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> Result<Hash, CoreError> {
        self.header.hash()
    }

    /// Add a consenter signature over the header hash
    pub fn sign_as_orderer(&mut self, secret_key: &SecretKey) -> Result<(), CoreError> {
        let header_hash = self.hash()?;
        self.metadata.signatures.push(OrdererSignature {
            signer: secret_key.public_key(),
            signature: sign(secret_key, header_hash.as_bytes()),
        });
        Ok(())
    }

    /// Copy of this block with the payload stripped
    pub fn header_only(&self) -> Self {
        Block {
            header: self.header.clone(),
            data: None,
            metadata: self.metadata.clone(),
        }
    }

    pub fn is_header_only(&self) -> bool {
        self.data.is_none()
    }

    /// Check the payload against `header.data_hash`. Header-only blocks fail.
    pub fn verify_data_hash(&self) -> Result<(), CoreError> {
        match &self.data {
            Some(data) if data.compute_hash() == self.header.data_hash => Ok(()),
            _ => Err(CoreError::DataHashMismatch(self.header.number)),
        }
    }
}
