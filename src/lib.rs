//! MoneroMiner - a Monero (XMR) CPU pool miner built on RandomX
//!
//! The miner connects to a mining pool over newline-delimited JSON-RPC,
//! keeps one RandomX dataset resident per seed-hash epoch, and searches
//! the 32-bit nonce space across worker threads, submitting every hash
//! that falls below the job's 256-bit target.
//!
//! Component map:
//! - [`network::PoolClient`] owns the pool connection: login, job
//!   notifications, share submission, reconnection.
//! - [`job::JobRegistry`] is the single source of truth for the active
//!   job and wakes workers on every accepted publish.
//! - [`randomx::RxContext`] owns the dataset lifecycle and the
//!   per-worker VMs.
//! - [`miner::WorkerPool`] drives the nonce search.
//! - [`stats`] aggregates counters and reports them periodically.

#![warn(missing_docs)]

/// Command-line interface definitions.
pub mod cli;

/// Configuration management.
pub mod config;

/// Job model and the job registry.
pub mod job;

/// Target arithmetic and the worker pool.
pub mod miner;

/// Pool communication.
pub mod network;

/// RandomX dataset, cache and VM lifecycle.
pub mod randomx;

/// Statistics collection and reporting.
pub mod stats;

/// Error handling and logging utilities.
pub mod utils;

// Core exports
pub use cli::Cli;
pub use config::Config;
pub use job::{Job, JobRegistry, Share};
pub use miner::WorkerPool;
pub use network::{PoolClient, PoolConfig};
pub use randomx::RxContext;
pub use stats::{MinerStats, StatsReporter};
pub use utils::{init_logging, MinerError};
