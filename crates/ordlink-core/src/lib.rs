//! Ordlink Core - Block, seek and crypto primitives
//!
//! This crate provides the types exchanged between a delivering client and
//! the nodes of an ordering cluster, together with the hashing, signing and
//! serialization helpers they rely on.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{hash_blake3, merkle_root, sign, verify, Hash, KeyPair, PublicKey, SecretKey, Sig};
pub use error::CoreError;
pub use types::*;
