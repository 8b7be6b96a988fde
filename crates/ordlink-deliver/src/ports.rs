//! Collaborators the delivery client depends on but does not implement.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use ordlink_core::{Block, DeliverResponse, SeekEnvelope};

use crate::endpoint::{ConnectionSource, Endpoint};
use crate::error::DeliverError;

/// Messages of one deliver stream, in orderer send order
pub type DeliverStream = BoxStream<'static, Result<DeliverResponse, DeliverError>>;

/// Height of the local ledger; seeds the first requested block number
pub trait LedgerInfo: Send + Sync {
    fn current_height(&self) -> Result<u64, DeliverError>;
}

/// Checks blocks and headers before they are accepted
pub trait BlockVerifier: Send + Sync {
    /// Verify a header-only block (header plus orderer signatures)
    fn verify_header(&self, block: &Block) -> Result<(), DeliverError>;

    /// Verify a full block
    fn verify_block(&self, block: &Block) -> Result<(), DeliverError>;
}

/// Identity used to authenticate seek requests
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, DeliverError>;

    fn serialize(&self) -> Result<Vec<u8>, DeliverError>;
}

/// Establishes a transport to one endpoint. Retrying is the caller's job.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn OrdererConnection>, DeliverError>;
}

/// An established transport that can open deliver streams
#[async_trait]
pub trait OrdererConnection: Send + Sync {
    async fn deliver(&self, envelope: SeekEnvelope) -> Result<DeliverStream, DeliverError>;
}

/// Everything a delivery client needs from the outside world
#[derive(Clone)]
pub struct DeliverServices {
    pub ledger: Arc<dyn LedgerInfo>,
    pub verifier: Arc<dyn BlockVerifier>,
    pub signer: Arc<dyn Signer>,
    pub dialer: Arc<dyn Dialer>,
    pub source: Arc<dyn ConnectionSource>,
}
