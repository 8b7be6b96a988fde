//! Failover controller.
//!
//! One supervisor task per client watches for receiver failures and polls
//! the censorship detector. Either one abandons the primary: it is demoted
//! to a header watcher, the controller backs off, refreshes the endpoint
//! set and promotes the best remaining slot.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::arena::{ClientState, Role, Slot};
use crate::backoff::Backoff;
use crate::client::Shared;
use crate::detector::{detect_censorship, CensorshipSuspicion};
use crate::endpoint::Endpoint;
use crate::error::DeliverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPhase {
    /// Primary streaming normally
    Active,
    /// Primary abandoned, waiting out the backoff
    Failing,
    /// Choosing the next primary
    Selecting,
    /// Starting the block receiver on the chosen slot
    Reconnecting,
}

/// Reported by workers to the supervisor
#[derive(Debug)]
pub(crate) enum ControlEvent {
    ReceiverFailed {
        slot: usize,
        generation: u64,
        error: DeliverError,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum FailoverReason {
    Failure(DeliverError),
    Censorship(CensorshipSuspicion),
}

impl FailoverReason {
    /// Endpoint whose headers exposed the censorship
    fn witness<'a>(&self, state: &'a ClientState) -> Option<&'a Endpoint> {
        match self {
            FailoverReason::Censorship(suspicion) => state
                .slots
                .get(suspicion.witness)
                .map(|slot| &slot.endpoint),
            FailoverReason::Failure(_) => None,
        }
    }

    /// Error recorded on the abandoned slot
    fn into_error(self, state: &ClientState, abandoned: usize) -> DeliverError {
        match self {
            FailoverReason::Failure(err) => err,
            FailoverReason::Censorship(suspicion) => DeliverError::Censored {
                address: state.slots[abandoned].endpoint.address.clone(),
                header_seq: suspicion.header_seq,
            },
        }
    }
}

/// Pick the next primary among active slots.
///
/// Slots are ranked by the most advanced header, then the earliest time it
/// arrived, then slot order. Slots whose last attempt failed come after
/// healthy ones, and slots with no progress come last. `abandoned` is only
/// chosen when nothing else is active.
pub(crate) fn select_candidate(slots: &[Slot], abandoned: Option<usize>) -> Option<usize> {
    let candidates = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_active())
        .filter(|(index, _)| Some(*index) != abandoned);

    let best = candidates.min_by(|(ia, a), (ib, b)| {
        let rank = |slot: &Slot| {
            (
                slot.progress.last_err.is_some(),
                slot.progress.last_seq_num.is_none(),
                std::cmp::Reverse(slot.progress.last_seq_num),
                slot.progress.last_seq_time,
            )
        };
        rank(a).cmp(&rank(b)).then(ia.cmp(ib))
    });

    best.map(|(index, _)| index)
        .or_else(|| abandoned.filter(|index| slots.get(*index).is_some_and(Slot::is_active)))
}

fn transition(state: &mut ClientState, next: FailoverPhase) {
    if state.phase != next {
        debug!("Failover phase {:?} -> {:?}", state.phase, next);
        state.phase = next;
    }
}

pub(crate) struct FailoverController {
    backoff: Backoff,
    failovers: u64,
}

impl FailoverController {
    pub fn new(shared: &Shared) -> Self {
        FailoverController {
            backoff: Backoff::with_budget(
                shared.config.min_backoff_delay(),
                shared.config.max_backoff_delay(),
                shared.config.total_backoff_delay(),
            ),
            failovers: 0,
        }
    }

    /// Forget past attempts once the current primary is reachable
    fn observe(&mut self, state: &ClientState) {
        if let Some(index) = state.primary {
            self.reset_if_reachable(&state.slots[index]);
        }
    }

    fn reset_if_reachable(&mut self, slot: &Slot) {
        let reachable = slot.connected || slot.progress.last_seq_num.is_some();
        if reachable && self.backoff.attempts() > 0 {
            debug!("{} was reachable, resetting backoff", slot.endpoint);
            self.backoff.reset();
        }
    }

    /// Replace the primary on slot `abandoned`.
    ///
    /// Returns an error only when the client can not continue.
    pub async fn fail_over(
        &mut self,
        shared: &Arc<Shared>,
        abandoned: usize,
        reason: FailoverReason,
    ) -> Result<(), DeliverError> {
        let (previous, witness) = {
            let mut state = shared.state.lock();
            if state.closed {
                return Ok(());
            }
            transition(&mut state, FailoverPhase::Failing);
            self.reset_if_reachable(&state.slots[abandoned]);
            let previous = state.slots[abandoned].endpoint.clone();
            let generation = shared.start_worker(&mut state, abandoned, Role::Header);
            let err = reason.clone().into_error(&state, abandoned);
            state.record_error(abandoned, generation, err);
            (previous, reason.witness(&state).cloned())
        };

        match &reason {
            FailoverReason::Censorship(suspicion) => warn!(
                "Suspected censorship by {} on channel {}: silent for {:?} while {} reached block {}",
                previous,
                shared.channel_id,
                suspicion.silent_for,
                witness.map_or_else(|| "a header watcher".to_string(), |e| e.to_string()),
                suspicion.header_seq
            ),
            FailoverReason::Failure(err) if err.is_protocol_violation() => warn!(
                "Dropping {} on channel {} for a protocol violation: {}",
                previous, shared.channel_id, err
            ),
            FailoverReason::Failure(err) => warn!(
                "Block delivery from {} failed on channel {}: {}",
                previous, shared.channel_id, err
            ),
        }

        let Some(delay) = self.backoff.next_delay() else {
            return Err(DeliverError::BackoffExhausted {
                attempts: self.backoff.attempts(),
                elapsed_ms: self.backoff.spent().as_millis() as u64,
            });
        };

        tokio::select! {
            _ = shared.root.cancelled() => return Ok(()),
            _ = sleep(delay) => {}
        }

        let endpoints = shared.services.source.endpoints(&shared.channel_id);

        let mut state = shared.state.lock();
        if state.closed {
            return Ok(());
        }
        transition(&mut state, FailoverPhase::Selecting);

        if endpoints.is_empty() {
            warn!(
                "Connection source returned no endpoints for {}, keeping the current set",
                shared.channel_id
            );
        } else {
            for index in state.reconcile(&endpoints, Instant::now()) {
                info!("Watching new endpoint {}", state.slots[index].endpoint);
                shared.start_worker(&mut state, index, Role::Header);
            }
        }

        let Some(next) = select_candidate(&state.slots, Some(abandoned)) else {
            return Err(DeliverError::NoEndpoints(shared.channel_id.clone()));
        };

        transition(&mut state, FailoverPhase::Reconnecting);
        shared.start_worker(&mut state, next, Role::Block);
        self.failovers += 1;

        info!(
            "Switched block delivery on {} from {} to {} (failover {}, attempt {}, waited {:?})",
            shared.channel_id,
            previous,
            state.slots[next].endpoint,
            self.failovers,
            self.backoff.attempts(),
            delay
        );

        transition(&mut state, FailoverPhase::Active);
        Ok(())
    }
}

/// Supervisor loop. Ends when the client closes or failover gives up.
pub(crate) async fn supervise(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
    let mut controller = FailoverController::new(&shared);
    let timeout = shared.config.block_censorship_timeout();
    let mut poll = interval(shared.config.censorship_poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let trigger = tokio::select! {
            _ = shared.root.cancelled() => break,
            Some(event) = events.recv() => match event {
                ControlEvent::ReceiverFailed { slot, generation, error } => {
                    if !shared.state.lock().is_current(slot, generation) {
                        continue;
                    }
                    Some((slot, FailoverReason::Failure(error)))
                }
            },
            _ = poll.tick() => {
                let state = shared.state.lock();
                controller.observe(&state);
                state
                    .detector_view()
                    .and_then(|view| detect_censorship(&view, Instant::now(), timeout))
                    .map(|suspicion| (suspicion.primary, FailoverReason::Censorship(suspicion)))
            }
        };

        let Some((slot, reason)) = trigger else {
            continue;
        };

        if let Err(err) = controller.fail_over(&shared, slot, reason).await {
            error!("Giving up block delivery on {}: {}", shared.channel_id, err);
            shared.terminate(err);
            break;
        }
    }

    debug!(
        "Failover supervisor for {} stopped in phase {:?}",
        shared.channel_id,
        shared.state.lock().phase
    );
}
