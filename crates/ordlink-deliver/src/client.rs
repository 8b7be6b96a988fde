//! The delivery client facade.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use ordlink_core::Block;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arena::{ClientState, Role};
use crate::config::DeliverConfig;
use crate::endpoint::Endpoint;
use crate::error::DeliverError;
use crate::failover::{self, ControlEvent, FailoverPhase};
use crate::ports::DeliverServices;
use crate::progress::{BlockProgress, HeaderProgress};
use crate::seek::SeekRequester;
use crate::{receiver, watcher};

/// State shared between the facade, the workers and the supervisor
pub(crate) struct Shared {
    pub channel_id: String,
    pub config: DeliverConfig,
    pub services: DeliverServices,
    pub seeker: SeekRequester,
    pub state: Mutex<ClientState>,
    /// Cancelled on close; every worker token is a child of it
    pub root: CancellationToken,
    pub blocks_tx: mpsc::Sender<Block>,
    pub control: mpsc::UnboundedSender<ControlEvent>,
}

impl Shared {
    /// Start a worker of `role` on slot `index`, replacing any previous one.
    /// Returns the new generation.
    pub fn start_worker(self: &Arc<Self>, state: &mut ClientState, index: usize, role: Role) -> u64 {
        let cancel = self.root.child_token();
        let generation = state.assign(index, role, cancel.clone(), Instant::now());
        let shared = Arc::clone(self);

        match role {
            Role::Block => {
                tokio::spawn(receiver::run(shared, index, generation, cancel));
            }
            Role::Header => {
                tokio::spawn(watcher::run(shared, index, generation, cancel));
            }
        }
        generation
    }

    /// Close the client with an error `recv` reports once
    pub fn terminate(&self, err: DeliverError) {
        {
            let mut state = self.state.lock();
            if !state.closed {
                state.closed = true;
                state.fatal = Some(err);
            }
        }
        self.root.cancel();
    }

    fn take_terminal_error(&self) -> DeliverError {
        self.state
            .lock()
            .fatal
            .take()
            .unwrap_or(DeliverError::ClientClosing)
    }
}

/// BFT block delivery for one channel.
///
/// Full blocks come from a single primary endpoint; every other endpoint is
/// followed header-only. When the primary fails, or stays silent while the
/// headers show newer blocks, delivery moves to another endpoint.
pub struct DeliveryClient {
    shared: Arc<Shared>,
    blocks: tokio::sync::Mutex<mpsc::Receiver<Block>>,
}

impl DeliveryClient {
    /// Start streaming from the block after the local ledger height.
    /// Must be called within a tokio runtime.
    pub fn start(
        channel_id: impl Into<String>,
        config: DeliverConfig,
        services: DeliverServices,
    ) -> Result<Self, DeliverError> {
        let channel_id = channel_id.into();

        let endpoints = services.source.endpoints(&channel_id);
        if endpoints.is_empty() {
            return Err(DeliverError::NoEndpoints(channel_id));
        }
        let height = services.ledger.current_height()?;

        let (blocks_tx, blocks_rx) = mpsc::channel(config.delivery_buffer.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let seeker = SeekRequester::new(
            channel_id.clone(),
            services.signer.clone(),
            config.client_cert_pem.as_deref(),
        );

        let shared = Arc::new(Shared {
            channel_id,
            config,
            services,
            seeker,
            state: Mutex::new(ClientState::new(endpoints, height)),
            root: CancellationToken::new(),
            blocks_tx,
            control: control_tx,
        });

        {
            let mut state = shared.state.lock();
            let count = state.slots.len();
            let primary = rand::thread_rng().gen_range(0..count);
            for index in 0..count {
                let role = if index == primary {
                    Role::Block
                } else {
                    Role::Header
                };
                shared.start_worker(&mut state, index, role);
            }

            info!(
                "Delivery client for {} started at block {} with primary {} and {} header watchers",
                shared.channel_id,
                height,
                state.slots[primary].endpoint,
                count - 1
            );
        }

        tokio::spawn(failover::supervise(Arc::clone(&shared), control_rx));

        Ok(DeliveryClient {
            shared,
            blocks: tokio::sync::Mutex::new(blocks_rx),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.shared.channel_id
    }

    /// Next block in order. After close every call returns
    /// `ClientClosing`, or the error that ended delivery, once.
    pub async fn recv(&self) -> Result<Block, DeliverError> {
        let root = &self.shared.root;

        let mut blocks = tokio::select! {
            biased;
            _ = root.cancelled() => return Err(self.shared.take_terminal_error()),
            blocks = self.blocks.lock() => blocks,
        };

        loop {
            let block = tokio::select! {
                biased;
                _ = root.cancelled() => return Err(self.shared.take_terminal_error()),
                block = blocks.recv() => block,
            };
            let Some(block) = block else {
                return Err(self.shared.take_terminal_error());
            };

            let mut state = self.shared.state.lock();
            let expected = state.next_delivery();
            match block.number().cmp(&expected) {
                Ordering::Equal => {
                    state.delivered = Some(expected);
                    return Ok(block);
                }
                Ordering::Less => {
                    debug!("Dropping block {}, already delivered", block.number());
                }
                Ordering::Greater => {
                    warn!(
                        "Dropping block {}, block {} has not been delivered yet",
                        block.number(),
                        expected
                    );
                }
            }
        }
    }

    /// Tell the client block `seq` has been committed. Only the block right
    /// after the current cursor, and only once `recv` returned it, moves the
    /// cursor; anything else is ignored.
    pub fn update_received(&self, seq: u64) {
        let mut state = self.shared.state.lock();
        if !state.update_received(seq) {
            debug!(
                "Ignoring update_received({}), next expected is {}",
                seq, state.next_seq
            );
        }
    }

    /// Current primary, `None` while failing over or after close
    pub fn get_endpoint(&self) -> Option<Endpoint> {
        let state = self.shared.state.lock();
        if state.closed {
            return None;
        }
        state.primary_endpoint()
    }

    /// Next block to ask for and when the last block arrived
    pub fn get_next_block_num_time(&self) -> BlockProgress {
        self.shared.state.lock().block_progress()
    }

    /// One entry per header watcher, in endpoint order
    pub fn get_headers_block_num_time(&self) -> Vec<HeaderProgress> {
        self.shared.state.lock().header_progress()
    }

    /// Best known height per endpoint address
    pub fn heights_by_endpoint(&self) -> BTreeMap<String, u64> {
        self.shared.state.lock().heights_by_endpoint()
    }

    /// Stop all streams. Safe to call any number of times from any thread.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.primary = None;
        }
        self.shared.root.cancel();
        info!("Delivery client for {} closed", self.shared.channel_id);
    }

    pub fn failover_phase(&self) -> FailoverPhase {
        self.shared.state.lock().phase
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl Drop for DeliveryClient {
    fn drop(&mut self) {
        self.close();
    }
}
