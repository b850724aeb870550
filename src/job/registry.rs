// src/job/registry.rs
//! Job registry
//!
//! Single source of truth for what the workers should be mining. The
//! registry holds the latest published [`Job`] as an atomically swapped
//! snapshot plus a monotonic epoch counter, and wakes blocked workers on
//! every accepted publish. Seed-hash preparation (the dataset rebuild)
//! happens through the [`EpochPreparer`] seam *before* the epoch counter
//! moves, so a worker observing epoch E is guaranteed the RandomX
//! context's active seed matches the snapshot it reads.

use crate::job::Job;
use crate::utils::error::MinerError;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Readies the hashing substrate for a seed hash before a job becomes
/// visible. Production wires this to `RxContext::ensure_epoch`; tests
/// substitute a recorder.
pub trait EpochPreparer: Send + Sync {
    /// Must return only once hashing against `seed_hex` is safe.
    fn prepare(&self, seed_hex: &str) -> Result<(), MinerError>;
}

impl EpochPreparer for crate::randomx::RxContext {
    fn prepare(&self, seed_hex: &str) -> Result<(), MinerError> {
        self.ensure_epoch(seed_hex)
    }
}

/// Result of a blocking wait on the registry.
#[derive(Debug)]
pub enum WaitOutcome {
    /// A newer job was published.
    NewJob(Arc<Job>),
    /// Shutdown was requested; the worker should exit.
    Shutdown,
}

/// Job ids compare numerically when both sides parse as decimal
/// integers, by string otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
enum JobKey {
    Numeric(u64),
    Text(String),
}

impl JobKey {
    fn new(id: &str) -> Self {
        match id.parse() {
            Ok(n) => JobKey::Numeric(n),
            Err(_) => JobKey::Text(id.to_string()),
        }
    }
}

struct WakeState {
    epoch: u64,
    shutdown: bool,
}

/// See the module docs.
pub struct JobRegistry {
    snapshot: ArcSwapOption<Job>,
    /// Mirror of `WakeState::epoch` for lock-free polling in the hash
    /// loop.
    epoch: AtomicU64,
    wake: Mutex<WakeState>,
    wakeup: Condvar,
    /// Serializes publishers and carries the duplicate-suppression
    /// state. Held across the (long) epoch preparation.
    publish: Mutex<Option<JobKey>>,
}

impl JobRegistry {
    /// Creates an empty registry at epoch 0.
    pub fn new() -> Self {
        JobRegistry {
            snapshot: ArcSwapOption::const_empty(),
            epoch: AtomicU64::new(0),
            wake: Mutex::new(WakeState {
                epoch: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            publish: Mutex::new(None),
        }
    }

    /// Publishes a job: duplicate ids are dropped, otherwise the epoch
    /// is prepared for the job's seed hash, the snapshot replaced, the
    /// epoch counter incremented and all waiting workers woken — in that
    /// order. Returns whether the job was accepted.
    pub fn publish(&self, job: Job, preparer: &dyn EpochPreparer) -> Result<bool, MinerError> {
        let mut last = self.publish.lock().unwrap();

        let key = JobKey::new(&job.job_id);
        if last.as_ref() == Some(&key) {
            log::debug!("skipping duplicate job {}", job.job_id);
            return Ok(false);
        }

        preparer.prepare(&job.seed_hash)?;

        log::info!(
            "new job {}: height {}, target 0x{:08x}, difficulty {:.0}",
            job.job_id,
            job.height,
            job.compact_target,
            job.difficulty
        );
        log::debug!("  blob: {}", hex::encode(&job.blob));
        log::debug!("  seed hash: {}", job.seed_hash);

        *last = Some(key);
        self.snapshot.store(Some(Arc::new(job)));

        let mut wake = self.wake.lock().unwrap();
        wake.epoch += 1;
        self.epoch.store(wake.epoch, Ordering::Release);
        self.wakeup.notify_all();
        Ok(true)
    }

    /// Latest published job, if any. Never blocks.
    pub fn current_snapshot(&self) -> Option<Arc<Job>> {
        self.snapshot.load_full()
    }

    /// Current epoch counter. Reading the epoch before the snapshot
    /// keeps the pair conservative: a worker can at worst observe a
    /// snapshot newer than its epoch and restart one iteration early.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// The current `(epoch, job)` pair, when a job exists.
    pub fn current_with_epoch(&self) -> Option<(u64, Arc<Job>)> {
        let epoch = self.epoch();
        self.current_snapshot().map(|job| (epoch, job))
    }

    /// Blocks until the epoch advances past `observed` or shutdown is
    /// requested.
    pub fn wait_for_change(&self, observed: u64) -> WaitOutcome {
        let mut wake = self.wake.lock().unwrap();
        loop {
            if wake.shutdown {
                return WaitOutcome::Shutdown;
            }
            if wake.epoch > observed {
                if let Some(job) = self.current_snapshot() {
                    return WaitOutcome::NewJob(job);
                }
            }
            wake = self.wakeup.wait(wake).unwrap();
        }
    }

    /// Wakes every waiter with the terminal sentinel.
    pub fn shutdown(&self) {
        let mut wake = self.wake.lock().unwrap();
        wake.shutdown = true;
        self.wakeup.notify_all();
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobParams;
    use std::sync::Mutex as StdMutex;
    use std::thread;
    use std::time::Duration;

    struct Recorder {
        seeds: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                seeds: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seeds.lock().unwrap().len()
        }
    }

    impl EpochPreparer for Recorder {
        fn prepare(&self, seed_hex: &str) -> Result<(), MinerError> {
            self.seeds.lock().unwrap().push(seed_hex.to_string());
            Ok(())
        }
    }

    fn job(id: &str, seed_byte: &str) -> Job {
        Job::from_params(JobParams {
            job_id: id.into(),
            blob: "00".repeat(76),
            target: "1d00ffff".into(),
            height: 1,
            seed_hash: seed_byte.repeat(32),
        })
        .unwrap()
    }

    #[test]
    fn duplicate_numeric_ids_publish_once() {
        let registry = JobRegistry::new();
        let prep = Recorder::new();

        assert!(registry.publish(job("17", "aa"), &prep).unwrap());
        assert!(!registry.publish(job("17", "aa"), &prep).unwrap());
        assert!(registry.publish(job("18", "aa"), &prep).unwrap());

        assert_eq!(registry.epoch(), 2);
        assert_eq!(prep.calls(), 2);
        assert_eq!(registry.current_snapshot().unwrap().job_id, "18");
    }

    #[test]
    fn leading_zeros_compare_numerically() {
        let registry = JobRegistry::new();
        let prep = Recorder::new();

        assert!(registry.publish(job("18", "aa"), &prep).unwrap());
        assert!(!registry.publish(job("018", "aa"), &prep).unwrap());
    }

    #[test]
    fn non_numeric_ids_fall_back_to_string_compare() {
        let registry = JobRegistry::new();
        let prep = Recorder::new();

        assert!(registry.publish(job("job-a", "aa"), &prep).unwrap());
        assert!(!registry.publish(job("job-a", "aa"), &prep).unwrap());
        assert!(registry.publish(job("job-b", "aa"), &prep).unwrap());
        assert_eq!(registry.epoch(), 2);
    }

    #[test]
    fn preparation_runs_before_epoch_advances() {
        struct EpochProbe<'a> {
            registry: &'a JobRegistry,
            seen: StdMutex<Vec<u64>>,
        }

        impl EpochPreparer for EpochProbe<'_> {
            fn prepare(&self, _seed: &str) -> Result<(), MinerError> {
                self.seen.lock().unwrap().push(self.registry.epoch());
                Ok(())
            }
        }

        let registry = JobRegistry::new();
        let probe = EpochProbe {
            registry: &registry,
            seen: StdMutex::new(Vec::new()),
        };

        registry.publish(job("1", "aa"), &probe).unwrap();
        registry.publish(job("2", "bb"), &probe).unwrap();

        // The preparer always observed the epoch *before* its own
        // publish took effect.
        assert_eq!(*probe.seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(registry.epoch(), 2);
    }

    #[test]
    fn failed_preparation_leaves_registry_untouched() {
        struct Failing;
        impl EpochPreparer for Failing {
            fn prepare(&self, _seed: &str) -> Result<(), MinerError> {
                Err(MinerError::Init("out of memory".into()))
            }
        }

        let registry = JobRegistry::new();
        assert!(registry.publish(job("1", "aa"), &Failing).is_err());
        assert_eq!(registry.epoch(), 0);
        assert!(registry.current_snapshot().is_none());

        // The failed id was not recorded; a retry is not a duplicate.
        let prep = Recorder::new();
        assert!(registry.publish(job("1", "aa"), &prep).unwrap());
    }

    #[test]
    fn wait_unblocks_on_publish() {
        let registry = Arc::new(JobRegistry::new());

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_for_change(0))
        };

        thread::sleep(Duration::from_millis(50));
        registry.publish(job("5", "aa"), &Recorder::new()).unwrap();

        match waiter.join().unwrap() {
            WaitOutcome::NewJob(job) => assert_eq!(job.job_id, "5"),
            WaitOutcome::Shutdown => panic!("expected a job"),
        }
    }

    #[test]
    fn wait_unblocks_on_shutdown() {
        let registry = Arc::new(JobRegistry::new());

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_for_change(0))
        };

        thread::sleep(Duration::from_millis(50));
        registry.shutdown();

        assert!(matches!(waiter.join().unwrap(), WaitOutcome::Shutdown));
    }

    #[test]
    fn stale_observer_returns_immediately() {
        let registry = JobRegistry::new();
        registry.publish(job("9", "aa"), &Recorder::new()).unwrap();

        match registry.wait_for_change(0) {
            WaitOutcome::NewJob(job) => assert_eq!(job.job_id, "9"),
            WaitOutcome::Shutdown => panic!("expected a job"),
        }
    }
}
