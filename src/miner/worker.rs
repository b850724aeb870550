// src/miner/worker.rs
//! Worker threads
//!
//! Each worker owns one RandomX VM and drives the nonce search for its
//! slice of the 32-bit nonce space: worker `i` of `N` starts at
//! `i · (2³² / N)` and scans upward, so fresh jobs get uniform coverage
//! with no per-hash coordination. After every hash the worker checks the
//! stop flag, the registry epoch and the VM's seed generation; the inner
//! loop reports how it ended through [`LoopExit`] and the outer loop
//! decides what happens next. A worker never holds a VM across a
//! blocking wait, which is what lets the context tear down an epoch
//! without racing the hash path.

use crate::job::{self, Job, JobRegistry, Share, WaitOutcome};
use crate::miner::target;
use crate::network::PoolClient;
use crate::randomx::{RxContext, VmHandle};
use crate::stats::MinerStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Submission attempts per candidate before it counts as rejected.
const SUBMIT_ATTEMPTS: u32 = 3;

/// Pause between failed submission attempts.
const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pause before re-reading the snapshot when the dataset for it is not
/// resident (epoch swap in flight).
const VM_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// How one pass of the inner hash loop ended.
#[derive(Debug)]
enum LoopExit {
    /// The registry epoch moved past the one being mined.
    NewJob,
    /// The context's seed generation moved; the VM must be dropped.
    StaleVm,
    /// Process shutdown was requested.
    Shutdown,
    /// The nonce counter wrapped; wait for fresh work instead of
    /// colliding with a peer's range.
    NonceExhausted,
}

/// Handle over the spawned worker threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers. Workers begin by waiting on the
    /// registry, so spawning before the first job is published is fine.
    pub fn spawn(
        threads: usize,
        ctx: Arc<RxContext>,
        registry: Arc<JobRegistry>,
        pool: Arc<PoolClient>,
        stats: Arc<MinerStats>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let handles = (0..threads)
            .map(|id| {
                let worker = Worker {
                    id,
                    threads,
                    ctx: Arc::clone(&ctx),
                    registry: Arc::clone(&registry),
                    pool: Arc::clone(&pool),
                    stats: Arc::clone(&stats),
                    stop: Arc::clone(&stop),
                    vm: None,
                };
                thread::spawn(move || worker.run())
            })
            .collect();
        WorkerPool { handles }
    }

    /// Waits for every worker to exit.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

/// The first nonce of worker `id`'s slice.
pub fn first_nonce(id: usize, threads: usize) -> u32 {
    (id as u64 * ((1u64 << 32) / threads as u64)) as u32
}

struct Worker {
    id: usize,
    threads: usize,
    ctx: Arc<RxContext>,
    registry: Arc<JobRegistry>,
    pool: Arc<PoolClient>,
    stats: Arc<MinerStats>,
    stop: Arc<AtomicBool>,
    vm: Option<VmHandle>,
}

impl Worker {
    fn run(mut self) {
        log::debug!("worker {} started", self.id);

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            let epoch = self.registry.epoch();
            let job = match self.registry.current_snapshot() {
                Some(job) => job,
                None => match self.registry.wait_for_change(epoch) {
                    WaitOutcome::NewJob(_) => continue,
                    WaitOutcome::Shutdown => break,
                },
            };

            if let Some(vm) = &self.vm {
                if vm.generation() != self.ctx.generation() {
                    self.vm = None;
                }
            }
            if self.vm.is_none() {
                match self.ctx.create_vm(&job.seed_hash) {
                    Ok(Some(vm)) => {
                        log::debug!("worker {} created VM", self.id);
                        self.vm = Some(vm);
                    }
                    Ok(None) => {
                        // The resident dataset belongs to another seed:
                        // an epoch swap is mid-flight and this snapshot
                        // is about to be replaced.
                        thread::sleep(VM_RETRY_PAUSE);
                        continue;
                    }
                    Err(e) => {
                        // VM allocation failure means mining cannot
                        // proceed on this machine.
                        log::error!("worker {}: {}", self.id, e);
                        self.stop.store(true, Ordering::Release);
                        self.registry.shutdown();
                        break;
                    }
                }
            }
            let Some(mut vm) = self.vm.take() else {
                continue;
            };

            match self.mine(&mut vm, &job, epoch) {
                LoopExit::Shutdown => break,
                LoopExit::NewJob => {
                    self.vm = Some(vm);
                }
                LoopExit::StaleVm => {
                    drop(vm);
                }
                LoopExit::NonceExhausted => {
                    log::debug!(
                        "worker {} exhausted its nonce range on job {}",
                        self.id,
                        job.job_id
                    );
                    drop(vm);
                    match self.registry.wait_for_change(epoch) {
                        WaitOutcome::NewJob(_) => {}
                        WaitOutcome::Shutdown => break,
                    }
                }
            }
        }

        log::debug!("worker {} stopped", self.id);
    }

    /// The hash loop for one job snapshot.
    fn mine(&self, vm: &mut VmHandle, job: &Job, epoch: u64) -> LoopExit {
        let mut blob = job.blob.clone();
        let mut nonce = first_nonce(self.id, self.threads);
        log::debug!(
            "worker {} mining job {} from nonce {:08x}",
            self.id,
            job.job_id,
            nonce
        );

        loop {
            job::write_nonce(&mut blob, nonce);
            let hash = vm.hash(&blob);
            self.stats.record_hash(self.id);

            if target::meets(target::hash_as_u256(&hash), job.target) {
                self.submit_candidate(job, nonce, hash);
            }

            if self.stop.load(Ordering::Relaxed) {
                return LoopExit::Shutdown;
            }
            if self.registry.epoch() != epoch {
                return LoopExit::NewJob;
            }
            if vm.generation() != self.ctx.generation() {
                return LoopExit::StaleVm;
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => return LoopExit::NonceExhausted,
            };
        }
    }

    /// Submits a candidate with retries. A candidate whose job is no
    /// longer current is dropped silently; it was computed against a
    /// superseded snapshot.
    fn submit_candidate(&self, job: &Job, nonce: u32, hash: [u8; 32]) {
        match self.registry.current_snapshot() {
            Some(current) if current.job_id == job.job_id => {}
            _ => {
                log::debug!(
                    "worker {} dropping candidate for superseded job {}",
                    self.id,
                    job.job_id
                );
                return;
            }
        }

        let share = Share {
            job_id: job.job_id.clone(),
            nonce,
            hash,
        };
        log::info!(
            "worker {} found share: job {}, nonce {}, hash {}",
            self.id,
            share.job_id,
            share.nonce_hex(),
            share.hash_hex()
        );

        let mut accepted = false;
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.pool.submit(&share) {
                Ok(true) => {
                    accepted = true;
                    break;
                }
                Ok(false) => {
                    log::warn!(
                        "share submission not accepted (attempt {}/{})",
                        attempt,
                        SUBMIT_ATTEMPTS
                    );
                }
                Err(e) => {
                    log::warn!(
                        "share submission failed (attempt {}/{}): {}",
                        attempt,
                        SUBMIT_ATTEMPTS,
                        e
                    );
                }
            }
            if attempt < SUBMIT_ATTEMPTS {
                thread::sleep(SUBMIT_RETRY_DELAY);
            }
        }

        if accepted {
            self.stats.record_accepted();
            log::info!("share accepted by pool");
        } else {
            self.stats.record_rejected();
            log::warn!("share rejected after {} attempts", SUBMIT_ATTEMPTS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_workers_partition_the_nonce_space() {
        assert_eq!(first_nonce(0, 4), 0x0000_0000);
        assert_eq!(first_nonce(1, 4), 0x4000_0000);
        assert_eq!(first_nonce(2, 4), 0x8000_0000);
        assert_eq!(first_nonce(3, 4), 0xC000_0000);
    }

    #[test]
    fn single_worker_owns_the_whole_space() {
        assert_eq!(first_nonce(0, 1), 0);
    }

    #[test]
    fn start_nonces_are_unique() {
        for n in [1usize, 2, 3, 5, 8, 16, 64] {
            let starts: Vec<u32> = (0..n).map(|i| first_nonce(i, n)).collect();
            let mut dedup = starts.clone();
            dedup.dedup();
            assert_eq!(starts.len(), dedup.len(), "collision with {} workers", n);
            // Strictly increasing, so ranges do not overlap at the start.
            assert!(starts.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
