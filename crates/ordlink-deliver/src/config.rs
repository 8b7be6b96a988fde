use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delivery client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverConfig {
    /// How long the primary may stay silent while headers advance
    pub block_censorship_timeout_ms: u64,
    /// Detector polling period
    pub censorship_poll_interval_ms: u64,
    /// First reconnection delay
    pub min_backoff_delay_ms: u64,
    /// Per-attempt reconnection delay cap
    pub max_backoff_delay_ms: u64,
    /// Cumulative reconnection delay before the client gives up
    pub block_rcv_total_backoff_delay_ms: u64,
    /// Dial and seek timeout
    pub conn_timeout_ms: u64,
    /// Blocks buffered between the receiver and `recv`
    pub delivery_buffer: usize,
    /// PEM of the client TLS certificate seek requests are bound to
    pub client_cert_pem: Option<String>,
}

impl Default for DeliverConfig {
    fn default() -> Self {
        DeliverConfig {
            block_censorship_timeout_ms: 20_000,
            censorship_poll_interval_ms: 250,
            min_backoff_delay_ms: 10,
            max_backoff_delay_ms: 10_000,
            block_rcv_total_backoff_delay_ms: 20_000,
            conn_timeout_ms: 3_000,
            delivery_buffer: 16,
            client_cert_pem: None,
        }
    }
}

impl DeliverConfig {
    /// Short timeouts for tests and local clusters
    pub fn for_testing() -> Self {
        DeliverConfig {
            block_censorship_timeout_ms: 1_000,
            censorship_poll_interval_ms: 50,
            min_backoff_delay_ms: 10,
            max_backoff_delay_ms: 200,
            block_rcv_total_backoff_delay_ms: 2_000,
            conn_timeout_ms: 500,
            delivery_buffer: 4,
            client_cert_pem: None,
        }
    }

    pub fn block_censorship_timeout(&self) -> Duration {
        Duration::from_millis(self.block_censorship_timeout_ms)
    }

    pub fn censorship_poll_interval(&self) -> Duration {
        Duration::from_millis(self.censorship_poll_interval_ms.max(1))
    }

    pub fn min_backoff_delay(&self) -> Duration {
        Duration::from_millis(self.min_backoff_delay_ms)
    }

    pub fn max_backoff_delay(&self) -> Duration {
        Duration::from_millis(self.max_backoff_delay_ms.max(self.min_backoff_delay_ms))
    }

    pub fn total_backoff_delay(&self) -> Duration {
        Duration::from_millis(self.block_rcv_total_backoff_delay_ms)
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_millis(self.conn_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeliverConfig::default();
        assert_eq!(config.block_censorship_timeout(), Duration::from_secs(20));
        assert_eq!(config.max_backoff_delay(), Duration::from_secs(10));
        assert!(config.censorship_poll_interval() < config.block_censorship_timeout());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DeliverConfig =
            serde_json::from_str(r#"{"block_censorship_timeout_ms": 2000}"#).unwrap();
        assert_eq!(config.block_censorship_timeout(), Duration::from_secs(2));
        assert_eq!(config.conn_timeout_ms, 3_000);
    }

    #[test]
    fn test_max_backoff_never_below_min() {
        let config = DeliverConfig {
            min_backoff_delay_ms: 500,
            max_backoff_delay_ms: 100,
            ..DeliverConfig::default()
        };
        assert_eq!(config.max_backoff_delay(), Duration::from_millis(500));
    }
}
