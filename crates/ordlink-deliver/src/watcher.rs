//! Header watcher: follows one endpoint's header-only stream so the
//! detector can tell what the cluster has produced.

use std::sync::Arc;

use futures_util::StreamExt;
use ordlink_core::{DeliverResponse, SeekContent};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backoff::Backoff;
use crate::client::Shared;
use crate::error::DeliverError;

/// Reconnects with its own backoff until cancelled or replaced
pub(crate) async fn run(
    shared: Arc<Shared>,
    slot: usize,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(
        shared.config.min_backoff_delay(),
        shared.config.max_backoff_delay(),
    );

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = watch(&shared, slot, generation, &mut backoff) => result,
        };

        let Err(error) = result else {
            return;
        };

        let endpoint = {
            let mut state = shared.state.lock();
            if !state.record_error(slot, generation, error.clone()) {
                return;
            }
            state.slots[slot].endpoint.clone()
        };

        let delay = backoff
            .next_delay()
            .unwrap_or_else(|| shared.config.max_backoff_delay());
        debug!(
            "Header stream from {} failed: {}, retrying in {:?}",
            endpoint, error, delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

async fn watch(
    shared: &Shared,
    slot: usize,
    generation: u64,
    backoff: &mut Backoff,
) -> Result<(), DeliverError> {
    let (endpoint, start) = {
        let state = shared.state.lock();
        (state.slots[slot].endpoint.clone(), state.header_resume_seq(slot))
    };

    let mut stream = shared
        .seeker
        .open_stream(
            shared.services.dialer.as_ref(),
            &endpoint,
            start,
            SeekContent::HeaderWithSig,
            shared.config.conn_timeout(),
        )
        .await?;

    debug!("Watching headers from {} starting at {}", endpoint, start);

    let mut last: Option<u64> = None;
    while let Some(message) = stream.next().await {
        let header = match message? {
            DeliverResponse::Block(block) => block,
            DeliverResponse::Status(status) => {
                return Err(DeliverError::UnexpectedStatus(status));
            }
        };
        let seq = header.number();

        match last {
            Some(prev) if seq < prev => {
                return Err(DeliverError::SequenceRegression { last: prev, got: seq });
            }
            Some(prev) if seq == prev => continue,
            _ => {}
        }

        shared.services.verifier.verify_header(&header)?;

        if !shared
            .state
            .lock()
            .record_header(slot, generation, seq, Instant::now())?
        {
            return Ok(());
        }

        backoff.reset();
        last = Some(seq);
        trace!("Header {} from {}", seq, endpoint);
    }

    Err(DeliverError::StreamClosed)
}
