use ordlink_core::{sign, KeyPair};

use crate::error::DeliverError;
use crate::ports::Signer;

/// Ed25519 signer; the serialized identity is the raw public key
pub struct KeyPairSigner {
    keypair: KeyPair,
}

impl KeyPairSigner {
    pub fn new(keypair: KeyPair) -> Self {
        KeyPairSigner { keypair }
    }

    pub fn generate() -> Self {
        Self::new(KeyPair::generate())
    }
}

impl Signer for KeyPairSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, DeliverError> {
        Ok(sign(&self.keypair.secret, message).as_bytes().to_vec())
    }

    fn serialize(&self) -> Result<Vec<u8>, DeliverError> {
        Ok(self.keypair.public.as_bytes().to_vec())
    }
}
