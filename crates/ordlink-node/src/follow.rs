use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ordlink_deliver::{
    DeliverAdapter, DeliverError, HttpDialer, KeyPairSigner, LedgerInfo, QuorumVerifier,
    StaticConnectionSource,
};
use tracing::{error, info, warn};

use crate::config::FollowConfig;

/// Local height for a follower that keeps no ledger of its own
#[derive(Debug, Default)]
pub struct HeightTracker(AtomicU64);

impl HeightTracker {
    pub fn new(height: u64) -> Self {
        HeightTracker(AtomicU64::new(height))
    }

    /// Record that block `number` was committed
    pub fn commit(&self, number: u64) {
        self.0.fetch_max(number + 1, Ordering::SeqCst);
    }
}

impl LedgerInfo for HeightTracker {
    fn current_height(&self) -> Result<u64, DeliverError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

pub fn build_adapter(config: &FollowConfig) -> Result<DeliverAdapter> {
    let consenters = config.consenter_keys()?;
    if consenters.is_empty() {
        warn!("No consenters configured, every block will be rejected");
    }
    let verifier = match config.quorum {
        Some(threshold) => QuorumVerifier::new(&consenters, threshold),
        None => QuorumVerifier::with_bft_threshold(&consenters),
    };
    info!(
        "Verifying blocks against {} consenters with threshold {}",
        consenters.len(),
        verifier.threshold()
    );

    Ok(DeliverAdapter::new(
        config.deliver.clone(),
        Arc::new(verifier),
        Arc::new(KeyPairSigner::new(config.signer_keypair()?)),
        Arc::new(
            HttpDialer::new(config.deliver.conn_timeout())
                .with_client_cert(config.deliver.client_cert_pem.as_deref()),
        ),
        Arc::new(StaticConnectionSource::new(config.endpoints.clone())),
    ))
}

/// Follow the configured channel until interrupted
pub async fn run_follow(config: FollowConfig) -> Result<()> {
    let adapter = build_adapter(&config)?;
    let tracker = Arc::new(HeightTracker::new(config.start_height));
    let client = Arc::new(adapter.client_for(&config.channel_id, tracker.clone())?);

    let interrupt = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, closing delivery client");
                client.close();
            }
        })
    };

    loop {
        match client.recv().await {
            Ok(block) => {
                let number = block.number();
                let tx_count = block.data.as_ref().map_or(0, |d| d.transactions.len());
                let source = client
                    .get_endpoint()
                    .map(|e| e.address)
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    "Block {} with {} transactions from {}",
                    number, tx_count, source
                );

                tracker.commit(number);
                client.update_received(number);
            }
            Err(DeliverError::ClientClosing) => break,
            Err(e) => {
                error!("Block delivery stopped: {}", e);
                interrupt.abort();
                return Err(e.into());
            }
        }
    }

    interrupt.abort();
    for header in client.get_headers_block_num_time() {
        info!(
            "Header source {} last at {:?}{}",
            header.endpoint,
            header.last_seq_num,
            header
                .last_err
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}
