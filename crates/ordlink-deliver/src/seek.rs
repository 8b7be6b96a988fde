use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ordlink_core::{
    serialize, tls_cert_hash, Hash, SeekContent, SeekEnvelope, SeekInfo, SeekPayload,
    SeekPosition,
};
use tokio::time::timeout;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::DeliverError;
use crate::ports::{DeliverStream, Dialer, Signer};

/// Builds signed seek requests and opens deliver streams with them.
/// Shared by the block receiver and the header watchers.
pub struct SeekRequester {
    channel_id: String,
    signer: Arc<dyn Signer>,
    tls_cert_hash: Option<Hash>,
}

impl SeekRequester {
    pub fn new(channel_id: String, signer: Arc<dyn Signer>, client_cert_pem: Option<&str>) -> Self {
        SeekRequester {
            channel_id,
            signer,
            tls_cert_hash: client_cert_pem.map(|pem| tls_cert_hash(pem.as_bytes())),
        }
    }

    /// Start position for the next wanted block. An empty ledger starts at the oldest block.
    pub fn position_for(next: u64) -> SeekPosition {
        if next == 0 {
            SeekPosition::Oldest
        } else {
            SeekPosition::Specified(next)
        }
    }

    pub fn seek_envelope(
        &self,
        position: SeekPosition,
        content: SeekContent,
    ) -> Result<SeekEnvelope, DeliverError> {
        let payload = SeekPayload {
            channel_id: self.channel_id.clone(),
            timestamp: unix_millis(),
            tls_cert_hash: self.tls_cert_hash,
            creator: self.signer.serialize()?,
            seek: SeekInfo::from_position(position, content),
        };
        let payload = serialize::to_bytes(&payload)?;
        let signature = self.signer.sign(&payload)?;

        Ok(SeekEnvelope { payload, signature })
    }

    /// Dial `endpoint` and request `content` starting at block `next`.
    /// Dialing and the seek itself are each bounded by `conn_timeout`.
    pub async fn open_stream(
        &self,
        dialer: &dyn Dialer,
        endpoint: &Endpoint,
        next: u64,
        content: SeekContent,
        conn_timeout: Duration,
    ) -> Result<DeliverStream, DeliverError> {
        let envelope = self.seek_envelope(Self::position_for(next), content)?;

        let connection = timeout(conn_timeout, dialer.dial(endpoint))
            .await
            .map_err(|_| DeliverError::ConnectTimeout(endpoint.address.clone()))??;

        debug!(
            endpoint = %endpoint,
            channel = %self.channel_id,
            next,
            ?content,
            "sending seek request"
        );

        timeout(conn_timeout, connection.deliver(envelope))
            .await
            .map_err(|_| DeliverError::ConnectTimeout(endpoint.address.clone()))?
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
