use std::sync::Arc;

use crate::client::DeliveryClient;
use crate::config::DeliverConfig;
use crate::endpoint::ConnectionSource;
use crate::error::DeliverError;
use crate::ports::{BlockVerifier, DeliverServices, Dialer, LedgerInfo, Signer};

/// Builds delivery clients that share one identity, dialer and endpoint
/// source. Each channel brings its own ledger.
#[derive(Clone)]
pub struct DeliverAdapter {
    config: DeliverConfig,
    verifier: Arc<dyn BlockVerifier>,
    signer: Arc<dyn Signer>,
    dialer: Arc<dyn Dialer>,
    source: Arc<dyn ConnectionSource>,
}

impl DeliverAdapter {
    pub fn new(
        config: DeliverConfig,
        verifier: Arc<dyn BlockVerifier>,
        signer: Arc<dyn Signer>,
        dialer: Arc<dyn Dialer>,
        source: Arc<dyn ConnectionSource>,
    ) -> Self {
        DeliverAdapter {
            config,
            verifier,
            signer,
            dialer,
            source,
        }
    }

    pub fn config(&self) -> &DeliverConfig {
        &self.config
    }

    pub fn client_for(
        &self,
        channel_id: &str,
        ledger: Arc<dyn LedgerInfo>,
    ) -> Result<DeliveryClient, DeliverError> {
        let services = DeliverServices {
            ledger,
            verifier: self.verifier.clone(),
            signer: self.signer.clone(),
            dialer: self.dialer.clone(),
            source: self.source.clone(),
        };
        DeliveryClient::start(channel_id, self.config.clone(), services)
    }
}
