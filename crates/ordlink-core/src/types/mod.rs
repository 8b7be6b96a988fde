pub mod block;
pub mod deliver;

pub use block::{Block, BlockData, BlockHeader, BlockMetadata, OrdererSignature};
pub use deliver::{
    tls_cert_hash, DeliverResponse, DeliverStatus, SeekBehavior, SeekContent, SeekEnvelope, SeekInfo,
    SeekPayload, SeekPosition, CLIENT_CERT_HEADER,
};
