// src/utils/error.rs
use std::io;
use thiserror::Error;

/// Main error type for the mining application.
///
/// Transport and protocol errors are recovered in place by the pool
/// client's reconnect loop; configuration and initialization errors are
/// fatal and surface as a one-line diagnostic with exit code 1. Share
/// rejection and shutdown are ordinary values, not errors.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Invalid or missing configuration (wallet, thread count, pool
    /// address).
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket create/connect/send/recv failures and timeouts.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed or unexpected traffic from the pool.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// RandomX cache/dataset/VM allocation or initialization failure.
    #[error("RandomX init error: {0}")]
    Init(String),
}

/// JSON that fails to parse or serialize is a protocol-level defect.
impl From<serde_json::Error> for MinerError {
    fn from(e: serde_json::Error) -> Self {
        MinerError::Protocol(format!("JSON error: {}", e))
    }
}

impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::Protocol(format!("hex conversion failed: {}", e))
    }
}
