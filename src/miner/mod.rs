// src/miner/mod.rs
//! Core mining functionality
//!
//! The 256-bit target arithmetic that decides whether a hash earns a
//! share, and the worker pool that searches the nonce space.

/// Compact-target expansion and 256-bit hash comparison.
pub mod target;

/// Worker threads driving the nonce search.
pub mod worker;

pub use target::U256;
pub use worker::WorkerPool;
