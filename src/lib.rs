//! A blocking client for memcached's text protocol.
//!
//! The crate is layered bottom-up: [`client::Client`] speaks to a single
//! server over a lazily opened connection, [`pool::PooledClient`] shares a
//! bounded pool of those clients between threads, and [`hash::HashClient`]
//! routes keys across a cluster with rendezvous hashing, quarantining
//! servers that fail and readmitting them after a cooldown.
//!
//! Values are encoded through a pluggable [`serde::Serde`]; the default
//! implementations cover raw bytes, text, integers and bincode-encoded
//! objects. If compression is undesired, it is possible to disable the
//! `zlib` feature (on by default.)

pub mod client;
pub mod discovery;
pub mod error;
pub mod hash;
pub mod pool;
pub mod rendezvous;
pub mod serde;
pub mod transport;

pub(crate) mod protocol;

#[cfg(feature = "zlib")]
pub mod zlib;

pub use crate::client::{CasToken, Client, ClientConfig};
pub use crate::error::Error;
pub use crate::hash::{HashClient, HashConfig, RoutedKey};
pub use crate::pool::{ObjectPool, PooledClient};
pub use crate::rendezvous::{NodeHasher, RendezvousHash};
pub use crate::serde::{DefaultSerde, NoSerde, Serde, Value};
pub use crate::transport::{KeepaliveOpts, ServerEndpoint, Transport};
