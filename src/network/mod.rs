// src/network/mod.rs
//! Network communication with the mining pool
//!
//! One component lives here: [`PoolClient`], which owns the TCP
//! connection to the pool and speaks the newline-delimited JSON-RPC
//! (Stratum-style) protocol: login, job notifications, share submission,
//! and reconnection after transport failures.

/// Mining pool client implementation.
pub mod pool;

pub use pool::{PoolClient, PoolConfig};
