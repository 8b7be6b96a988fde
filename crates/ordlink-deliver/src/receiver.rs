//! Block receiver: the one full-block stream of a client.

use std::sync::Arc;

use futures_util::StreamExt;
use ordlink_core::{DeliverResponse, SeekContent};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Shared;
use crate::error::DeliverError;
use crate::failover::ControlEvent;

pub(crate) async fn run(
    shared: Arc<Shared>,
    slot: usize,
    generation: u64,
    cancel: CancellationToken,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = receive(&shared, slot, generation) => result,
    };

    let Err(error) = result else {
        return;
    };

    if shared.state.lock().record_error(slot, generation, error.clone()) {
        let _ = shared.control.send(ControlEvent::ReceiverFailed {
            slot,
            generation,
            error,
        });
    }
}

/// Stream blocks until the stream fails. `Ok` means the worker was replaced.
async fn receive(shared: &Shared, slot: usize, generation: u64) -> Result<(), DeliverError> {
    let (endpoint, start) = {
        let state = shared.state.lock();
        (state.slots[slot].endpoint.clone(), state.slots[slot].start_seq)
    };

    let mut stream = shared
        .seeker
        .open_stream(
            shared.services.dialer.as_ref(),
            &endpoint,
            start,
            SeekContent::Block,
            shared.config.conn_timeout(),
        )
        .await?;

    shared.state.lock().mark_connected(slot, generation);
    info!("Receiving blocks from {} starting at {}", endpoint, start);

    let mut expected = start;
    while let Some(message) = stream.next().await {
        let block = match message? {
            DeliverResponse::Block(block) => block,
            DeliverResponse::Status(status) => {
                return Err(DeliverError::UnexpectedStatus(status));
            }
        };

        if block.number() != expected {
            warn!(
                "{} sent block {} while {} was expected",
                endpoint,
                block.number(),
                expected
            );
            return Err(DeliverError::OutOfOrder {
                expected,
                got: block.number(),
            });
        }

        shared.services.verifier.verify_block(&block)?;

        if !shared
            .state
            .lock()
            .record_block(slot, generation, expected, Instant::now())?
        {
            return Ok(());
        }

        let permit = match shared.blocks_tx.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                debug!("Delivery buffer full, waiting on the consumer");
                shared.state.lock().set_awaiting_consumer(slot, generation, true);
                let permit = shared.blocks_tx.reserve().await;
                shared.state.lock().set_awaiting_consumer(slot, generation, false);
                permit.map_err(|_| DeliverError::ClientClosing)?
            }
            Err(TrySendError::Closed(())) => return Err(DeliverError::ClientClosing),
        };
        permit.send(block);

        debug!("Received block {} from {}", expected, endpoint);
        expected += 1;
    }

    Err(DeliverError::StreamClosed)
}
