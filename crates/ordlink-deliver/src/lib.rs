//! BFT block delivery.
//!
//! A [`DeliveryClient`] pulls full blocks from one ordering endpoint and
//! header-only streams from all the others. Headers that run ahead of a
//! silent primary are taken as evidence of censorship, and delivery fails
//! over to another endpoint with exponential backoff.

pub mod adapter;
mod arena;
pub mod backoff;
pub mod client;
pub mod config;
pub mod detector;
pub mod endpoint;
pub mod error;
pub mod failover;
pub mod identity;
pub mod ports;
pub mod progress;
mod receiver;
pub mod seek;
pub mod transport;
pub mod verifier;
mod watcher;

pub use adapter::DeliverAdapter;
pub use arena::Role;
pub use backoff::Backoff;
pub use client::DeliveryClient;
pub use config::DeliverConfig;
pub use detector::{detect_censorship, CensorshipSuspicion, DetectorView, HeaderView};
pub use endpoint::{ConnectionSource, Endpoint, StaticConnectionSource};
pub use error::DeliverError;
pub use failover::FailoverPhase;
pub use identity::KeyPairSigner;
pub use ports::{
    BlockVerifier, DeliverServices, DeliverStream, Dialer, LedgerInfo, OrdererConnection, Signer,
};
pub use progress::{BlockProgress, HeaderProgress};
pub use seek::SeekRequester;
pub use transport::HttpDialer;
pub use verifier::QuorumVerifier;
