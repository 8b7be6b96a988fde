//! Censorship detection.
//!
//! Headers flowing from the other endpoints prove that the cluster is
//! producing blocks. If they are ahead of the primary and the primary has
//! been silent for longer than the censorship timeout, the silence is
//! attributed to the primary.

use std::time::Duration;

use tokio::time::Instant;

/// Progress of one header watcher as seen by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderView {
    pub ordinal: usize,
    pub last_seq_num: Option<u64>,
    pub last_seq_time: Option<Instant>,
}

/// Consistent snapshot the detector decides on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorView {
    pub primary: usize,
    /// Next block number the primary owes
    pub block_next: u64,
    pub block_last_time: Option<Instant>,
    pub block_started_at: Instant,
    pub awaiting_consumer: bool,
    pub headers: Vec<HeaderView>,
}

/// Why the detector wants the primary replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CensorshipSuspicion {
    pub primary: usize,
    /// Watcher with the most advanced header
    pub witness: usize,
    pub header_seq: u64,
    pub silent_for: Duration,
}

pub fn detect_censorship(
    view: &DetectorView,
    now: Instant,
    timeout: Duration,
) -> Option<CensorshipSuspicion> {
    // A primary blocked on a slow consumer is not withholding anything.
    if view.awaiting_consumer {
        return None;
    }

    let silent_since = match view.block_last_time {
        Some(last) => last.max(view.block_started_at),
        None => view.block_started_at,
    };
    let silent_for = now.saturating_duration_since(silent_since);
    if silent_for <= timeout {
        return None;
    }

    view.headers
        .iter()
        .filter_map(|h| Some((h.ordinal, h.last_seq_num?, h.last_seq_time?)))
        .filter(|(_, seq, _)| *seq >= view.block_next)
        .filter(|(_, _, time)| view.block_last_time.map_or(true, |last| *time > last))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)).then(b.0.cmp(&a.0)))
        .map(|(witness, header_seq, _)| CensorshipSuspicion {
            primary: view.primary,
            witness,
            header_seq,
            silent_for,
        })
}
