use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ordlink_orderer::{BlockLedger, ClusterProducer, OrdererConfig, OrdererServer};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ClusterConfig;

/// Run every node of the cluster plus the block producer until interrupted
pub async fn run_cluster(config: ClusterConfig) -> Result<()> {
    let consenters = config.consenters()?;
    if consenters.is_empty() {
        return Err(anyhow::anyhow!("Cluster configuration has no consenter keys"));
    }

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let mut ledgers = Vec::with_capacity(consenters.len());

    for index in 0..consenters.len() {
        let ledger = Arc::new(BlockLedger::new());
        ledgers.push(Arc::clone(&ledger));

        let server = OrdererServer::new(
            OrdererConfig {
                http_addr: config.node_addr(index)?,
                channel_id: config.channel_id.clone(),
                require_tls_binding: config.require_tls_binding,
            },
            ledger,
        );
        let token = server.shutdown_token();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            stop.cancelled().await;
            token.cancel();
        });

        tasks.spawn(async move {
            if let Err(e) = server.run().await {
                error!("Orderer {} failed: {}", index, e);
            }
        });
    }

    info!(
        "Started {} orderers for {} from port {}",
        consenters.len(),
        config.channel_id,
        config.base_port
    );

    let producer = Arc::new(ClusterProducer::new(
        consenters,
        ledgers,
        Duration::from_millis(config.round_time_ms),
        config.txs_per_block,
    ));
    tasks.spawn(producer.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping cluster");
    shutdown.cancel();

    while tasks.join_next().await.is_some() {}
    Ok(())
}
