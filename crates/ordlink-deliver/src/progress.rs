//! Per-connection progress records and the snapshots handed to observers.

use tokio::time::Instant;

use crate::endpoint::Endpoint;
use crate::error::DeliverError;

/// Progress of one connection. Written only by the worker owning the
/// connection (or by the failover controller while it swaps roles).
#[derive(Debug, Clone, Default)]
pub struct ProgressRecord {
    pub last_seq_num: Option<u64>,
    pub last_seq_time: Option<Instant>,
    pub last_err: Option<DeliverError>,
}

impl ProgressRecord {
    /// Record receipt of `seq`. Sequence numbers never go backwards.
    pub(crate) fn advance(&mut self, seq: u64, now: Instant) -> Result<(), DeliverError> {
        if let Some(last) = self.last_seq_num {
            if seq < last {
                return Err(DeliverError::SequenceRegression { last, got: seq });
            }
        }
        self.last_seq_num = Some(seq);
        self.last_seq_time = Some(now);
        self.last_err = None;
        Ok(())
    }

    pub(crate) fn fail(&mut self, err: DeliverError) {
        self.last_err = Some(err);
    }
}

/// Block receiver view returned by `get_next_block_num_time`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockProgress {
    /// Next block number the client will request
    pub next_block_num: u64,
    /// When the last full block arrived, across all primaries
    pub last_block_time: Option<Instant>,
}

/// Header watcher view returned by `get_headers_block_num_time`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProgress {
    pub endpoint: Endpoint,
    pub last_seq_num: Option<u64>,
    pub last_seq_time: Option<Instant>,
    pub last_err: Option<DeliverError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let mut record = ProgressRecord::default();
        let now = Instant::now();

        record.advance(5, now).unwrap();
        record.advance(5, now).unwrap();
        record.advance(7, now).unwrap();
        assert_eq!(record.last_seq_num, Some(7));

        assert_eq!(
            record.advance(6, now),
            Err(DeliverError::SequenceRegression { last: 7, got: 6 })
        );
        assert_eq!(record.last_seq_num, Some(7));
    }

    #[test]
    fn test_advance_clears_error() {
        let mut record = ProgressRecord::default();
        record.fail(DeliverError::StreamClosed);
        assert!(record.last_err.is_some());

        record.advance(1, Instant::now()).unwrap();
        assert!(record.last_err.is_none());
        assert!(record.last_seq_time.is_some());
    }
}
