//! Ordlink Orderer - deliver service of one ordering node
//!
//! Serves a channel's blocks over HTTP: `POST /deliver` answers a signed
//! seek with a newline-delimited JSON stream of blocks or headers.

pub mod error;
pub mod http;
pub mod ledger;
pub mod producer;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use http::{create_router, AppState};

pub use error::OrdererError;
pub use http::handlers::{StatusResponse, WithholdRequest};
pub use ledger::BlockLedger;
pub use producer::ClusterProducer;

/// Orderer service configuration
#[derive(Debug, Clone)]
pub struct OrdererConfig {
    /// HTTP bind address
    pub http_addr: SocketAddr,
    pub channel_id: String,
    /// Reject seeks not bound to the client certificate presented with them
    pub require_tls_binding: bool,
}

impl Default for OrdererConfig {
    fn default() -> Self {
        OrdererConfig {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 7050)),
            channel_id: "ordlink-channel".to_string(),
            require_tls_binding: false,
        }
    }
}

/// Deliver service for one ordering node
pub struct OrdererServer {
    config: OrdererConfig,
    app_state: Arc<AppState>,
}

impl OrdererServer {
    pub fn new(config: OrdererConfig, ledger: Arc<BlockLedger>) -> Self {
        let (withholding, _) = watch::channel(false);
        let app_state = Arc::new(AppState {
            channel_id: config.channel_id.clone(),
            ledger,
            withholding,
            require_tls_binding: config.require_tls_binding,
            shutdown: CancellationToken::new(),
        });

        OrdererServer { config, app_state }
    }

    pub fn ledger(&self) -> Arc<BlockLedger> {
        Arc::clone(&self.app_state.ledger)
    }

    /// Stall full-block streams while headers keep flowing
    pub fn set_withholding(&self, withholding: bool) {
        self.app_state.withholding.send_replace(withholding);
    }

    pub fn is_withholding(&self) -> bool {
        *self.app_state.withholding.borrow()
    }

    /// Cancelling the token stops the server and ends its open streams
    pub fn shutdown_token(&self) -> CancellationToken {
        self.app_state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.app_state))
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.http_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        let router = self.router();
        let shutdown = self.shutdown_token();

        info!(
            "Starting orderer for {} on {}",
            self.config.channel_id,
            listener.local_addr()?
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}
