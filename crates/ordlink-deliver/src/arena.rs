//! Client state: one slot per endpoint, each tagged with its current role.
//!
//! Failover re-tags slots instead of rebuilding connections, so a slot index
//! stays valid for the life of the client. Every worker carries the
//! generation it was started with; writes from an outdated generation are
//! dropped, which keeps a single writer per progress record.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::detector::{DetectorView, HeaderView};
use crate::endpoint::Endpoint;
use crate::error::DeliverError;
use crate::failover::FailoverPhase;
use crate::progress::{BlockProgress, HeaderProgress, ProgressRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Full-block stream, the single primary
    Block,
    /// Header-only lag detection stream
    Header,
}

pub(crate) struct Slot {
    pub endpoint: Endpoint,
    pub role: Role,
    pub progress: ProgressRecord,
    pub generation: u64,
    pub started_at: Instant,
    /// First block number the current block worker asked for
    pub start_seq: u64,
    /// Block worker is parked on a full delivery buffer
    pub awaiting_consumer: bool,
    /// Current worker opened its deliver stream
    pub connected: bool,
    pub cancel: Option<CancellationToken>,
    pub retired: bool,
}

impl Slot {
    fn new(endpoint: Endpoint, now: Instant) -> Self {
        Slot {
            endpoint,
            role: Role::Header,
            progress: ProgressRecord::default(),
            generation: 0,
            started_at: now,
            start_seq: 0,
            awaiting_consumer: false,
            connected: false,
            cancel: None,
            retired: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.retired
    }
}

pub(crate) struct ClientState {
    pub slots: Vec<Slot>,
    pub primary: Option<usize>,
    /// Cursor for the next seek; moves only through `update_received`
    pub next_seq: u64,
    /// Last block number returned by `recv`
    pub delivered: Option<u64>,
    pub last_block_time: Option<Instant>,
    pub closed: bool,
    /// Terminal error waiting to be returned once by `recv`
    pub fatal: Option<DeliverError>,
    pub phase: FailoverPhase,
    next_generation: u64,
}

impl ClientState {
    pub fn new(endpoints: Vec<Endpoint>, next_seq: u64) -> Self {
        let now = Instant::now();
        ClientState {
            slots: endpoints.into_iter().map(|e| Slot::new(e, now)).collect(),
            primary: None,
            next_seq,
            delivered: None,
            last_block_time: None,
            closed: false,
            fatal: None,
            phase: FailoverPhase::Active,
            next_generation: 1,
        }
    }

    /// Give slot `index` a new role and worker generation, cancelling
    /// whatever worker held it before. Progress starts over.
    pub fn assign(&mut self, index: usize, role: Role, cancel: CancellationToken, now: Instant) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        let start_seq = self.next_seq;

        let slot = &mut self.slots[index];
        if let Some(previous) = slot.cancel.replace(cancel) {
            previous.cancel();
        }
        slot.role = role;
        slot.generation = generation;
        slot.progress = ProgressRecord::default();
        slot.started_at = now;
        slot.start_seq = start_seq;
        slot.awaiting_consumer = false;
        slot.connected = false;

        match role {
            Role::Block => self.primary = Some(index),
            Role::Header if self.primary == Some(index) => self.primary = None,
            Role::Header => {}
        }

        generation
    }

    /// Stop the worker of slot `index` without assigning a new one
    pub fn stop(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }
        if self.primary == Some(index) {
            self.primary = None;
        }
    }

    pub fn is_current(&self, index: usize, generation: u64) -> bool {
        let slot = &self.slots[index];
        !self.closed && !slot.retired && slot.generation == generation
    }

    /// Returns `Ok(false)` when the caller's generation is outdated
    pub fn record_block(
        &mut self,
        index: usize,
        generation: u64,
        seq: u64,
        now: Instant,
    ) -> Result<bool, DeliverError> {
        if !self.is_current(index, generation) {
            return Ok(false);
        }
        self.slots[index].progress.advance(seq, now)?;
        self.last_block_time = Some(now);
        Ok(true)
    }

    /// Returns `Ok(false)` when the caller's generation is outdated
    pub fn record_header(
        &mut self,
        index: usize,
        generation: u64,
        seq: u64,
        now: Instant,
    ) -> Result<bool, DeliverError> {
        if !self.is_current(index, generation) {
            return Ok(false);
        }
        self.slots[index].progress.advance(seq, now)?;
        Ok(true)
    }

    pub fn record_error(&mut self, index: usize, generation: u64, err: DeliverError) -> bool {
        if !self.is_current(index, generation) {
            return false;
        }
        self.slots[index].progress.fail(err);
        true
    }

    pub fn set_awaiting_consumer(&mut self, index: usize, generation: u64, waiting: bool) {
        if self.is_current(index, generation) {
            self.slots[index].awaiting_consumer = waiting;
        }
    }

    pub fn mark_connected(&mut self, index: usize, generation: u64) {
        if self.is_current(index, generation) {
            self.slots[index].connected = true;
        }
    }

    /// Block number `recv` may hand out next
    pub fn next_delivery(&self) -> u64 {
        match self.delivered {
            Some(last) => last + 1,
            None => self.next_seq,
        }
    }

    /// Advance the cursor. Only `seq == next_seq` for an already delivered
    /// block is accepted; anything else is ignored.
    pub fn update_received(&mut self, seq: u64) -> bool {
        let delivered = self.delivered.is_some_and(|last| seq <= last);
        if self.closed || seq != self.next_seq || !delivered {
            return false;
        }
        self.next_seq = seq + 1;
        true
    }

    /// Where a header watcher on slot `index` resumes after a reconnect
    pub fn header_resume_seq(&self, index: usize) -> u64 {
        let resume = self.slots[index]
            .progress
            .last_seq_num
            .map_or(0, |last| last + 1);
        resume.max(self.next_seq)
    }

    /// Next block the primary owes us
    pub fn block_next(&self, index: usize) -> u64 {
        let slot = &self.slots[index];
        slot.progress
            .last_seq_num
            .map_or(slot.start_seq, |last| last + 1)
    }

    /// Add slots for new endpoints and retire the ones that disappeared.
    /// Returns the indices of added slots.
    pub fn reconcile(&mut self, endpoints: &[Endpoint], now: Instant) -> Vec<usize> {
        for index in 0..self.slots.len() {
            if self.slots[index].is_active() && !endpoints.contains(&self.slots[index].endpoint) {
                self.stop(index);
                self.slots[index].retired = true;
            }
        }

        let mut added = Vec::new();
        for endpoint in endpoints {
            match self.slots.iter().position(|s| &s.endpoint == endpoint) {
                Some(index) if self.slots[index].retired => {
                    self.slots[index].retired = false;
                    added.push(index);
                }
                Some(_) => {}
                None => {
                    self.slots.push(Slot::new(endpoint.clone(), now));
                    added.push(self.slots.len() - 1);
                }
            }
        }
        added
    }

    pub fn primary_endpoint(&self) -> Option<Endpoint> {
        self.primary.map(|index| self.slots[index].endpoint.clone())
    }

    pub fn block_progress(&self) -> BlockProgress {
        BlockProgress {
            next_block_num: self.next_seq,
            last_block_time: self.last_block_time,
        }
    }

    pub fn header_progress(&self) -> Vec<HeaderProgress> {
        self.slots
            .iter()
            .filter(|s| s.is_active() && s.role == Role::Header)
            .map(|s| HeaderProgress {
                endpoint: s.endpoint.clone(),
                last_seq_num: s.progress.last_seq_num,
                last_seq_time: s.progress.last_seq_time,
                last_err: s.progress.last_err.clone(),
            })
            .collect()
    }

    /// Best known height per endpoint
    pub fn heights_by_endpoint(&self) -> BTreeMap<String, u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .filter_map(|(index, s)| {
                let height = match s.role {
                    Role::Block => Some(self.block_next(index)),
                    Role::Header => s.progress.last_seq_num.map(|n| n + 1),
                };
                height.map(|h| (s.endpoint.address.clone(), h))
            })
            .collect()
    }

    /// Inputs for the censorship detector, `None` without a primary
    pub fn detector_view(&self) -> Option<DetectorView> {
        let primary = self.primary?;
        let slot = &self.slots[primary];

        Some(DetectorView {
            primary,
            block_next: self.block_next(primary),
            block_last_time: slot.progress.last_seq_time,
            block_started_at: slot.started_at,
            awaiting_consumer: slot.awaiting_consumer,
            headers: self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_active() && s.role == Role::Header)
                .map(|(ordinal, s)| HeaderView {
                    ordinal,
                    last_seq_num: s.progress.last_seq_num,
                    last_seq_time: s.progress.last_seq_time,
                })
                .collect(),
        })
    }
}
