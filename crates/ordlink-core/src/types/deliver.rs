use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash};
use crate::error::CoreError;
use crate::serialize;
use crate::types::block::Block;

/// Where a deliver stream starts or stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekPosition {
    Oldest,
    Newest,
    Specified(u64),
}

/// What a deliver stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeekContent {
    /// Full blocks
    Block,
    /// Header plus orderer signatures, no payload
    HeaderWithSig,
}

/// What the orderer does when the start position is not yet available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekBehavior {
    BlockUntilReady,
    FailIfNotReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekInfo {
    pub start: SeekPosition,
    pub stop: SeekPosition,
    pub behavior: SeekBehavior,
    pub content: SeekContent,
}

impl SeekInfo {
    /// An open-ended, blocking seek from `start`
    pub fn from_position(start: SeekPosition, content: SeekContent) -> Self {
        SeekInfo {
            start,
            stop: SeekPosition::Specified(u64::MAX),
            behavior: SeekBehavior::BlockUntilReady,
            content,
        }
    }
}

/// Signed part of a seek request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekPayload {
    pub channel_id: String,
    /// Unix time in milliseconds
    pub timestamp: u64,
    /// Hash of the client TLS certificate the request is bound to
    pub tls_cert_hash: Option<Hash>,
    /// Serialized identity of the requester
    pub creator: Vec<u8>,
    pub seek: SeekInfo,
}

/// Request header carrying the hex-encoded PEM of the client certificate
/// presented on the connection
pub const CLIENT_CERT_HEADER: &str = "x-ordlink-client-cert";

/// Binding hash of a client certificate, as carried in `SeekPayload::tls_cert_hash`
pub fn tls_cert_hash(cert_pem: &[u8]) -> Hash {
    hash_blake3(cert_pem)
}

/// A seek request as sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekEnvelope {
    /// Bincode-encoded `SeekPayload`
    pub payload: Vec<u8>,
    /// Signature over `payload`
    pub signature: Vec<u8>,
}

impl SeekEnvelope {
    pub fn open(&self) -> Result<SeekPayload, CoreError> {
        serialize::from_bytes(&self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverStatus {
    Success,
    BadRequest,
    Forbidden,
    NotFound,
    ServiceUnavailable,
}

/// One message on a deliver stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DeliverResponse {
    Block(Block),
    Status(DeliverStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_envelope() {
        let payload = SeekPayload {
            channel_id: "test-chain".to_string(),
            timestamp: 1,
            tls_cert_hash: None,
            creator: vec![0, 2, 4, 6],
            seek: SeekInfo::from_position(SeekPosition::Specified(5), SeekContent::Block),
        };
        let envelope = SeekEnvelope {
            payload: serialize::to_bytes(&payload).unwrap(),
            signature: vec![1, 2, 3],
        };

        assert_eq!(envelope.open().unwrap(), payload);
    }

    #[test]
    fn test_open_garbage_envelope() {
        let envelope = SeekEnvelope {
            payload: vec![0xff],
            signature: vec![],
        };
        assert!(envelope.open().is_err());
    }

    #[test]
    fn test_status_json_shape() {
        let json = serde_json::to_string(&DeliverResponse::Status(DeliverStatus::NotFound)).unwrap();
        assert_eq!(json, r#"{"type":"Status","data":"NotFound"}"#);
    }
}
