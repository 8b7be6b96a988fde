use ordlink_core::{CoreError, DeliverStatus};
use thiserror::Error;

/// Errors surfaced by the delivery client.
///
/// Values are `Clone` because the last error of every connection is kept in
/// its progress record and handed out in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliverError {
    /// Graceful shutdown; consumers stop calling `recv` when they see it.
    #[error("client is closing")]
    ClientClosing,

    #[error("no ordering endpoints configured for channel {0}")]
    NoEndpoints(String),

    #[error("invalid endpoint {address}: {reason}")]
    InvalidEndpoint { address: String, reason: String },

    #[error("failed to dial {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("deliver stream closed by orderer")]
    StreamClosed,

    #[error("orderer replied with status {0:?}")]
    UnexpectedStatus(DeliverStatus),

    #[error("out-of-order block: expected {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("sequence regression: last {last}, got {got}")]
    SequenceRegression { last: u64, got: u64 },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("censorship suspected: {address} withheld blocks while headers reached {header_seq}")]
    Censored { address: String, header_seq: u64 },

    #[error("backoff budget exhausted after {attempts} attempts ({elapsed_ms}ms)")]
    BackoffExhausted { attempts: u32, elapsed_ms: u64 },

    #[error("ledger height unavailable: {0}")]
    Ledger(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("core error: {0}")]
    Core(String),
}

impl DeliverError {
    /// Out-of-order or unverifiable data from an endpoint
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            DeliverError::OutOfOrder { .. }
                | DeliverError::SequenceRegression { .. }
                | DeliverError::Verification(_)
        )
    }
}

impl From<CoreError> for DeliverError {
    fn from(err: CoreError) -> Self {
        DeliverError::Core(err.to_string())
    }
}
