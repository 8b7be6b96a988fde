mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, Harness, MemLedger, MockCluster};
use ordlink_core::SeekContent;
use ordlink_deliver::{
    DeliverConfig, DeliverError, DeliverServices, DeliveryClient, KeyPairSigner, QuorumVerifier,
    StaticConnectionSource,
};

#[tokio::test]
async fn test_blocked_recv_returns_closing_sentinel() {
    let harness = Arc::new(Harness::start(4, 0, DeliverConfig::for_testing()));

    let waiting = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.client.recv().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.client.close();

    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .expect("recv did not unblock")
        .unwrap();
    assert_eq!(result, Err(DeliverError::ClientClosing));

    // every later call sees the sentinel too
    assert_eq!(harness.client.recv().await, Err(DeliverError::ClientClosing));
    assert_eq!(harness.client.recv().await, Err(DeliverError::ClientClosing));
    assert!(harness.client.is_closed());
    assert_eq!(harness.client.get_endpoint(), None);
}

#[tokio::test]
async fn test_close_releases_every_blocked_recv() {
    let harness = Arc::new(Harness::start(3, 0, DeliverConfig::for_testing()));

    let waiting: Vec<_> = (0..5)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move { harness.client.recv().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.client.close();

    for handle in waiting {
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("recv did not unblock")
            .unwrap();
        assert_eq!(result, Err(DeliverError::ClientClosing));
    }
}

#[tokio::test]
async fn test_concurrent_close_is_safe() {
    let harness = Arc::new(Harness::start(3, 0, DeliverConfig::for_testing()));
    harness.cluster.produce(3);
    harness.consume().await;

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move { harness.client.close() })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap();
    }

    assert!(harness.client.is_closed());
    assert_eq!(harness.client.recv().await, Err(DeliverError::ClientClosing));

    // snapshots stay readable, updates are ignored
    harness.client.update_received(1);
    assert_eq!(harness.client.get_next_block_num_time().next_block_num, 1);
    assert_eq!(harness.client.get_headers_block_num_time().len(), 2);
}

#[tokio::test]
async fn test_close_stops_streams() {
    let harness = Harness::start(3, 0, DeliverConfig::for_testing());
    harness.cluster.produce(1);
    harness.consume().await;

    harness.client.close();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let before: Vec<_> = harness
        .client
        .get_headers_block_num_time()
        .into_iter()
        .map(|h| h.last_seq_num)
        .collect();

    harness.cluster.produce(3);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after: Vec<_> = harness
        .client
        .get_headers_block_num_time()
        .into_iter()
        .map(|h| h.last_seq_num)
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_backoff_exhaustion_is_fatal() {
    let config = DeliverConfig {
        min_backoff_delay_ms: 10,
        max_backoff_delay_ms: 50,
        block_rcv_total_backoff_delay_ms: 300,
        ..DeliverConfig::for_testing()
    };
    let harness = Harness::start(1, 0, config);
    harness.cluster.produce(1);
    harness.consume().await;

    harness.primary().shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), harness.client.recv())
        .await
        .expect("exhaustion not reported");
    assert!(matches!(result, Err(DeliverError::BackoffExhausted { .. })));

    // reported once, then the plain sentinel
    assert_eq!(harness.client.recv().await, Err(DeliverError::ClientClosing));
    assert!(harness.client.is_closed());
}

#[tokio::test]
async fn test_reachable_primaries_keep_backoff_budget() {
    let config = DeliverConfig {
        min_backoff_delay_ms: 10,
        max_backoff_delay_ms: 50,
        block_rcv_total_backoff_delay_ms: 300,
        ..DeliverConfig::for_testing()
    };
    // quiet channel: no primary ever delivers a block
    let harness = Harness::start(2, 0, config);
    let block_seeks = |harness: &Harness| {
        harness
            .cluster
            .orderers
            .iter()
            .map(|o| o.seek_count(SeekContent::Block))
            .sum::<usize>()
    };

    let mut seen = 0;
    for round in 0..15 {
        let connected = eventually(Duration::from_secs(3), || {
            block_seeks(&harness) > seen && harness.client.get_endpoint().is_some()
        })
        .await;
        assert!(connected, "no primary connected in round {}", round);
        seen = block_seeks(&harness);

        let primary = harness.primary();
        primary.shutdown();
        tokio::time::sleep(Duration::from_millis(30)).await;
        primary.restart();
    }

    assert!(!harness.client.is_closed());

    harness.cluster.produce(1);
    assert_eq!(harness.consume().await.number(), 0);
}

#[tokio::test]
async fn test_single_endpoint_recovers_after_restart() {
    let harness = Harness::start(1, 0, DeliverConfig::for_testing());
    harness.cluster.produce(2);
    harness.consume().await;

    let only = harness.primary();
    only.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    only.restart();

    assert_eq!(harness.consume().await.number(), 1);
    assert_eq!(harness.client.get_endpoint().unwrap().address, only.address);
}

#[tokio::test]
async fn test_start_without_endpoints() {
    let cluster = MockCluster::new(1);
    let services = DeliverServices {
        ledger: MemLedger::new(0),
        verifier: Arc::new(QuorumVerifier::with_bft_threshold(&cluster.consenter_keys())),
        signer: Arc::new(KeyPairSigner::generate()),
        dialer: cluster.clone(),
        source: Arc::new(StaticConnectionSource::new(Vec::new())),
    };

    let result = DeliveryClient::start("empty", DeliverConfig::for_testing(), services);
    assert!(matches!(result, Err(DeliverError::NoEndpoints(channel)) if channel == "empty"));
}
