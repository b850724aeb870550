// src/stats/reporter.rs
//! Mining statistics
//!
//! Counters are plain atomics updated from the hot path; the reporter is
//! a background thread that logs a summary line at a fixed cadence and
//! is stopped through a channel at shutdown.

use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Process-wide mining counters.
///
/// `accepted + rejected` only ever grows; hash counts are kept per
/// worker and in aggregate.
pub struct MinerStats {
    hashes: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    per_thread: Vec<AtomicU64>,
    start: Instant,
}

impl MinerStats {
    /// Creates counters for `threads` workers.
    pub fn new(threads: usize) -> Self {
        MinerStats {
            hashes: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            per_thread: (0..threads).map(|_| AtomicU64::new(0)).collect(),
            start: Instant::now(),
        }
    }

    /// Counts one hash for worker `thread_id`.
    pub fn record_hash(&self, thread_id: usize) {
        self.hashes.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.per_thread.get(thread_id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts one accepted share.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one rejected share.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Total hashes across all workers.
    pub fn total_hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    /// Hashes computed by one worker.
    pub fn thread_hashes(&self, thread_id: usize) -> u64 {
        self.per_thread
            .get(thread_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Accepted share count.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Rejected share count.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Time since the counters were created.
    pub fn runtime(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whole-run average hashrate.
    pub fn average_hashrate(&self) -> f64 {
        let secs = self.runtime().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_hashes() as f64 / secs
    }
}

/// Formats a hashrate with the customary unit prefixes.
pub fn format_hashrate(rate: f64) -> String {
    if rate >= 1e9 {
        format!("{:.2} GH/s", rate / 1e9)
    } else if rate >= 1e6 {
        format!("{:.2} MH/s", rate / 1e6)
    } else if rate >= 1e3 {
        format!("{:.2} kH/s", rate / 1e3)
    } else {
        format!("{:.2} H/s", rate)
    }
}

/// Background reporter logging a stats line at a fixed interval.
pub struct StatsReporter {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatsReporter {
    /// Spawns the reporter thread.
    pub fn start(stats: Arc<MinerStats>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            let mut system = System::new_all();
            let mut last_hashes = 0u64;
            let mut last_time = Instant::now();

            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let now = Instant::now();
                        let total = stats.total_hashes();
                        let elapsed = now.duration_since(last_time).as_secs_f64().max(0.001);
                        let rate = (total - last_hashes) as f64 / elapsed;
                        last_hashes = total;
                        last_time = now;

                        system.refresh_cpu_all();
                        let cpus = system.cpus();
                        let cpu_usage = if cpus.is_empty() {
                            0.0
                        } else {
                            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
                        };

                        log::info!(
                            "hashrate: {} | shares: {}/{} | total hashes: {} | cpu: {:.1}%",
                            format_hashrate(rate),
                            stats.accepted(),
                            stats.rejected(),
                            total,
                            cpu_usage
                        );
                    }
                }
            }
        });

        StatsReporter {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stops and joins the reporter thread.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = MinerStats::new(2);
        stats.record_hash(0);
        stats.record_hash(0);
        stats.record_hash(1);
        stats.record_accepted();
        stats.record_rejected();
        stats.record_accepted();

        assert_eq!(stats.total_hashes(), 3);
        assert_eq!(stats.thread_hashes(0), 2);
        assert_eq!(stats.thread_hashes(1), 1);
        assert_eq!(stats.accepted(), 2);
        assert_eq!(stats.rejected(), 1);
    }

    #[test]
    fn out_of_range_thread_ids_are_ignored() {
        let stats = MinerStats::new(1);
        stats.record_hash(7);
        assert_eq!(stats.total_hashes(), 1);
        assert_eq!(stats.thread_hashes(7), 0);
    }

    #[test]
    fn share_totals_never_decrease() {
        let stats = MinerStats::new(1);
        let mut last = 0;
        for i in 0..10 {
            if i % 2 == 0 {
                stats.record_accepted();
            } else {
                stats.record_rejected();
            }
            let total = stats.accepted() + stats.rejected();
            assert!(total >= last);
            last = total;
        }
        assert_eq!(last, 10);
    }

    #[test]
    fn hashrate_units() {
        assert_eq!(format_hashrate(12.5), "12.50 H/s");
        assert_eq!(format_hashrate(1_250.0), "1.25 kH/s");
        assert_eq!(format_hashrate(2_500_000.0), "2.50 MH/s");
        assert_eq!(format_hashrate(3_000_000_000.0), "3.00 GH/s");
    }
}
