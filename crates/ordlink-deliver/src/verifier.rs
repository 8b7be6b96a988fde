use std::collections::HashSet;

use ordlink_core::{verify, Block, PublicKey};
use tracing::debug;

use crate::error::DeliverError;
use crate::ports::BlockVerifier;

/// Accepts a header once `threshold` distinct consenters have signed it
pub struct QuorumVerifier {
    consenters: HashSet<PublicKey>,
    threshold: usize,
}

impl QuorumVerifier {
    pub fn new(consenters: &[PublicKey], threshold: usize) -> Self {
        QuorumVerifier {
            consenters: consenters.iter().copied().collect(),
            threshold,
        }
    }

    /// f+1 signatures out of N = 3f+1 consenters: at least one honest signer
    pub fn with_bft_threshold(consenters: &[PublicKey]) -> Self {
        let f = consenters.len().saturating_sub(1) / 3;
        Self::new(consenters, f + 1)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn verify_signatures(&self, block: &Block) -> Result<(), DeliverError> {
        let header_hash = block.hash()?;
        let mut signers = HashSet::new();

        for entry in &block.metadata.signatures {
            if !self.consenters.contains(&entry.signer) {
                debug!(block = block.number(), "ignoring signature from unknown signer {}", entry.signer);
                continue;
            }
            if verify(&entry.signer, header_hash.as_bytes(), &entry.signature).is_err() {
                return Err(DeliverError::Verification(format!(
                    "invalid signature from {} on block {}",
                    entry.signer,
                    block.number()
                )));
            }
            signers.insert(entry.signer);
        }

        if signers.len() < self.threshold {
            return Err(DeliverError::Verification(format!(
                "block {} has {} consenter signatures, need {}",
                block.number(),
                signers.len(),
                self.threshold
            )));
        }

        Ok(())
    }
}

impl BlockVerifier for QuorumVerifier {
    fn verify_header(&self, block: &Block) -> Result<(), DeliverError> {
        self.verify_signatures(block)
    }

    fn verify_block(&self, block: &Block) -> Result<(), DeliverError> {
        block
            .verify_data_hash()
            .map_err(|e| DeliverError::Verification(e.to_string()))?;
        self.verify_signatures(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordlink_core::{BlockData, KeyPair};

    fn signed_block(signers: &[&KeyPair]) -> Block {
        let mut block = Block::build(
            None,
            BlockData {
                transactions: vec![vec![1, 2]],
            },
        )
        .unwrap();
        for signer in signers {
            block.sign_as_orderer(&signer.secret).unwrap();
        }
        block
    }

    #[test]
    fn test_bft_threshold() {
        let keys: Vec<PublicKey> = (0..4).map(|_| KeyPair::generate().public).collect();
        assert_eq!(QuorumVerifier::with_bft_threshold(&keys).threshold(), 2);
        assert_eq!(QuorumVerifier::with_bft_threshold(&keys[..1]).threshold(), 1);
    }

    #[test]
    fn test_quorum_reached() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let verifier = QuorumVerifier::new(&[a.public, b.public], 2);

        let block = signed_block(&[&a, &b]);
        assert!(verifier.verify_block(&block).is_ok());
        assert!(verifier.verify_header(&block.header_only()).is_ok());
    }

    #[test]
    fn test_duplicate_signer_counts_once() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let verifier = QuorumVerifier::new(&[a.public, b.public], 2);

        let block = signed_block(&[&a, &a]);
        assert!(matches!(
            verifier.verify_block(&block),
            Err(DeliverError::Verification(_))
        ));
    }

    #[test]
    fn test_unknown_signers_ignored() {
        let a = KeyPair::generate();
        let outsider = KeyPair::generate();
        let verifier = QuorumVerifier::new(&[a.public], 1);

        assert!(verifier.verify_block(&signed_block(&[&outsider])).is_err());
        assert!(verifier.verify_block(&signed_block(&[&outsider, &a])).is_ok());
    }

    #[test]
    fn test_header_only_fails_block_verification() {
        let a = KeyPair::generate();
        let verifier = QuorumVerifier::new(&[a.public], 1);
        let block = signed_block(&[&a]);

        assert!(verifier.verify_block(&block.header_only()).is_err());
    }
}
