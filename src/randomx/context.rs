// src/randomx/context.rs
//! RandomX dataset and VM lifecycle
//!
//! One [`RxContext`] lives for the whole process. It owns the ~2 GiB
//! dataset for the current seed-hash epoch and hands out per-worker VMs
//! bound to it. Epoch changes are serialized by the context lock and
//! follow a strict order: flag existing VMs stale, wait for the workers
//! to drop them, release the old dataset, then build (or reload from
//! disk) the dataset for the new seed. Workers recreate their VMs lazily
//! afterwards, so no VM ever references a freed dataset.
//!
//! Hash calls go through [`VmHandle`] and touch no lock; only creation
//! and teardown synchronize with the context.

use crate::randomx::ffi;
use crate::utils::error::MinerError;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Upper bound on dataset-initialization threads.
const MAX_INIT_THREADS: usize = 8;

/// Owner of the cache/dataset/VM resources for the active epoch.
pub struct RxContext {
    /// Serializes epoch changes and VM creation.
    epoch: Mutex<EpochState>,
    /// Bumped at the start of every epoch change; VMs created under an
    /// older value are stale and must be dropped before the swap.
    generation: AtomicU64,
    /// Outstanding VM accounting, shared with every [`VmHandle`].
    vms: Arc<VmAccounting>,
}

struct EpochState {
    /// Lowercase hex of the seed the dataset was built from; empty
    /// before the first epoch.
    seed_hex: String,
    dataset: *mut ffi::randomx_dataset,
}

// The raw dataset pointer is only touched under the epoch mutex (or, for
// hashing, through VMs whose lifetime the accounting below pins inside
// the epoch). The pointed-to memory is immutable once initialized.
unsafe impl Send for EpochState {}
unsafe impl Sync for RxContext {}

struct VmAccounting {
    count: Mutex<usize>,
    idle: Condvar,
}

impl VmAccounting {
    fn register(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn unregister(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_until_idle(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.idle.wait(count).unwrap();
        }
    }
}

/// Raw pointer wrapper so dataset/cache pointers can cross into the
/// initialization threads.
struct SendPtr<T>(*mut T);
impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for SendPtr<T> {}
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl RxContext {
    /// Creates an empty context; no dataset exists until the first
    /// [`ensure_epoch`](Self::ensure_epoch).
    pub fn new() -> Self {
        RxContext {
            epoch: Mutex::new(EpochState {
                seed_hex: String::new(),
                dataset: std::ptr::null_mut(),
            }),
            generation: AtomicU64::new(0),
            vms: Arc::new(VmAccounting {
                count: Mutex::new(0),
                idle: Condvar::new(),
            }),
        }
    }

    fn dataset_flags() -> ffi::randomx_flags {
        ffi::RANDOMX_FLAG_FULL_MEM | ffi::RANDOMX_FLAG_JIT | ffi::RANDOMX_FLAG_HARD_AES
    }

    fn vm_flags() -> ffi::randomx_flags {
        Self::dataset_flags() | ffi::RANDOMX_FLAG_SECURE
    }

    /// Current seed generation. A [`VmHandle`] whose generation differs
    /// is stale and must be dropped by its worker.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Makes the dataset for `seed_hex` the active one. Idempotent: a
    /// repeat call for the current seed returns immediately.
    ///
    /// On a seed change this blocks until every outstanding VM has been
    /// dropped, releases the old dataset, then loads the persisted
    /// dataset from disk or rebuilds it from scratch (allocating a
    /// cache, initializing it from the 32 seed bytes, and filling the
    /// dataset in parallel). Returns `MinerError::Init` on any
    /// allocation or thread-pool failure; mining cannot proceed past
    /// that.
    pub fn ensure_epoch(&self, seed_hex: &str) -> Result<(), MinerError> {
        let mut state = self.epoch.lock().unwrap();
        if state.seed_hex == seed_hex && !state.dataset.is_null() {
            log::debug!("dataset for seed {} already resident", seed_hex);
            return Ok(());
        }

        let seed = hex::decode(seed_hex)
            .map_err(|e| MinerError::Init(format!("invalid seed hash {}: {}", seed_hex, e)))?;

        log::info!("seed hash changed to {}, rebuilding dataset", seed_hex);

        // Flag every existing VM stale and wait for the workers to drop
        // them; the dataset must not be freed under a live VM.
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.vms.wait_until_idle();

        if !state.dataset.is_null() {
            unsafe { ffi::randomx_release_dataset(state.dataset) };
            state.dataset = std::ptr::null_mut();
            state.seed_hex.clear();
        }

        let item_count = unsafe { ffi::randomx_dataset_item_count() } as u64;
        let dataset_size = item_count * ffi::RANDOMX_DATASET_ITEM_SIZE;

        let dataset = unsafe { ffi::randomx_alloc_dataset(Self::dataset_flags()) };
        if dataset.is_null() {
            return Err(MinerError::Init(
                "failed to allocate RandomX dataset memory".into(),
            ));
        }

        if load_dataset(dataset, dataset_size, &seed, seed_hex) {
            log::info!("dataset loaded from {}", dataset_path(seed_hex).display());
        } else if let Err(e) = build_dataset(dataset, item_count, &seed, seed_hex) {
            unsafe { ffi::randomx_release_dataset(dataset) };
            return Err(e);
        }

        state.seed_hex = seed_hex.to_string();
        state.dataset = dataset;
        log::info!("RandomX initialization complete for seed {}", seed_hex);
        Ok(())
    }

    /// Allocates a VM bound to the active dataset, using the
    /// full-memory + JIT + hardware-AES + secure flag set. Serialized
    /// against epoch changes by the same lock.
    ///
    /// The caller names the seed its job was issued for; `Ok(None)`
    /// means the resident dataset (if any) belongs to a different seed
    /// — the job snapshot is about to be superseded and the worker
    /// should back off briefly and re-read it. This is what keeps a
    /// worker from ever hashing an old job against a new dataset.
    /// Allocation failure is fatal.
    pub fn create_vm(&self, seed_hex: &str) -> Result<Option<VmHandle>, MinerError> {
        let state = self.epoch.lock().unwrap();
        if state.dataset.is_null() || state.seed_hex != seed_hex {
            return Ok(None);
        }

        let vm =
            unsafe { ffi::randomx_create_vm(Self::vm_flags(), std::ptr::null_mut(), state.dataset) };
        if vm.is_null() {
            return Err(MinerError::Init("failed to allocate RandomX VM".into()));
        }

        self.vms.register();
        Ok(Some(VmHandle {
            vm,
            generation: self.generation.load(Ordering::Acquire),
            vms: Arc::clone(&self.vms),
        }))
    }
}

impl Default for RxContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RxContext {
    fn drop(&mut self) {
        let state = self.epoch.get_mut().unwrap();
        if !state.dataset.is_null() {
            unsafe { ffi::randomx_release_dataset(state.dataset) };
            state.dataset = std::ptr::null_mut();
        }
    }
}

/// A per-worker RandomX virtual machine.
///
/// Owned by exactly one worker thread; dropped (and recreated through
/// the context) whenever the seed generation moves.
pub struct VmHandle {
    vm: *mut ffi::randomx_vm,
    generation: u64,
    vms: Arc<VmAccounting>,
}

// A handle lives on one worker thread at a time; the dataset it points
// into is immutable and outlives it via the epoch protocol.
unsafe impl Send for VmHandle {}

impl VmHandle {
    /// Single-shot RandomX hash of `input`. Lock-free.
    pub fn hash(&mut self, input: &[u8]) -> [u8; ffi::RANDOMX_HASH_SIZE] {
        let mut out = [0u8; ffi::RANDOMX_HASH_SIZE];
        unsafe {
            ffi::randomx_calculate_hash(
                self.vm,
                input.as_ptr() as *const _,
                input.len(),
                out.as_mut_ptr() as *mut _,
            );
        }
        out
    }

    /// The seed generation this VM was created under.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for VmHandle {
    fn drop(&mut self) {
        unsafe { ffi::randomx_destroy_vm(self.vm) };
        self.vms.unregister();
    }
}

/// Builds the dataset from scratch: cache from seed bytes, parallel
/// ranged initialization, best-effort persistence, cache release.
fn build_dataset(
    dataset: *mut ffi::randomx_dataset,
    item_count: u64,
    seed: &[u8],
    seed_hex: &str,
) -> Result<(), MinerError> {
    log::info!("building new RandomX dataset ({} items)", item_count);

    let cache = unsafe { ffi::randomx_alloc_cache(RxContext::dataset_flags()) };
    if cache.is_null() {
        return Err(MinerError::Init(
            "failed to allocate RandomX cache memory".into(),
        ));
    }

    unsafe { ffi::randomx_init_cache(cache, seed.as_ptr() as *const _, seed.len()) };

    let threads = num_cpus::get().clamp(1, MAX_INIT_THREADS);
    let per_thread = item_count / threads as u64;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| {
            unsafe { ffi::randomx_release_cache(cache) };
            MinerError::Init(format!("dataset init pool: {}", e))
        })?;

    log::info!("initializing dataset across {} threads", threads);
    let progress = AtomicU64::new(0);
    let cache = SendPtr(cache);
    let dataset = SendPtr(dataset);
    pool.scope(|scope| {
        for j in 0..threads {
            let cache = cache;
            let dataset = dataset;
            let progress = &progress;
            scope.spawn(move |_| {
                let cache = cache;
                let dataset = dataset;
                let start = j as u64 * per_thread;
                // The last range picks up the remainder.
                let count = if j == threads - 1 {
                    item_count - start
                } else {
                    per_thread
                };
                unsafe {
                    ffi::randomx_init_dataset(dataset.0, cache.0, start as _, count as _);
                }
                let done = progress.fetch_add(count, Ordering::Relaxed) + count;
                log::debug!(
                    "dataset initialization {}% complete",
                    done * 100 / item_count
                );
            });
        }
    });

    let dataset_size = item_count * ffi::RANDOMX_DATASET_ITEM_SIZE;
    if let Err(e) = save_dataset(dataset.0, dataset_size, seed, seed_hex) {
        log::warn!(
            "failed to save dataset to {}: {}",
            dataset_path(seed_hex).display(),
            e
        );
    } else {
        log::info!("dataset saved to {}", dataset_path(seed_hex).display());
    }

    unsafe { ffi::randomx_release_cache(cache.0) };
    Ok(())
}

/// On-disk location for a persisted dataset.
fn dataset_path(seed_hex: &str) -> PathBuf {
    PathBuf::from(format!("randomx_dataset_{}.bin", seed_hex))
}

/// Serializes the persistence header:
/// `u64 dataset_size | u32 seed_len | seed bytes`, little-endian.
fn encode_header(dataset_size: u64, seed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + seed.len());
    out.extend_from_slice(&dataset_size.to_le_bytes());
    out.extend_from_slice(&(seed.len() as u32).to_le_bytes());
    out.extend_from_slice(seed);
    out
}

/// Validates a persisted header against the expected size and seed.
/// Any mismatch is a load abort, never fatal; the caller rebuilds.
fn parse_header(
    reader: &mut impl Read,
    expected_size: u64,
    expected_seed: &[u8],
) -> Result<(), String> {
    let mut size_buf = [0u8; 8];
    reader
        .read_exact(&mut size_buf)
        .map_err(|e| format!("short read on dataset size: {}", e))?;
    let file_size = u64::from_le_bytes(size_buf);
    if file_size != expected_size {
        return Err(format!(
            "dataset size mismatch (file {}, expected {})",
            file_size, expected_size
        ));
    }

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|e| format!("short read on seed length: {}", e))?;
    let seed_len = u32::from_le_bytes(len_buf) as usize;
    if seed_len != expected_seed.len() {
        return Err(format!(
            "seed length mismatch (file {}, expected {})",
            seed_len,
            expected_seed.len()
        ));
    }

    let mut seed_buf = vec![0u8; seed_len];
    reader
        .read_exact(&mut seed_buf)
        .map_err(|e| format!("short read on seed: {}", e))?;
    if seed_buf != expected_seed {
        return Err("seed hash mismatch".into());
    }

    Ok(())
}

/// Attempts to fill `dataset` from the persisted file for `seed_hex`.
/// Returns `false` (after a warning) on any mismatch or I/O problem.
fn load_dataset(
    dataset: *mut ffi::randomx_dataset,
    dataset_size: u64,
    seed: &[u8],
    seed_hex: &str,
) -> bool {
    let path = dataset_path(seed_hex);
    if !path.exists() {
        return false;
    }

    log::info!("loading cached dataset from {}", path.display());
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("cannot open {}: {}", path.display(), e);
            return false;
        }
    };
    let mut reader = BufReader::new(file);

    if let Err(reason) = parse_header(&mut reader, dataset_size, seed) {
        log::warn!("ignoring {}: {}", path.display(), reason);
        return false;
    }

    let memory = unsafe { ffi::randomx_get_dataset_memory(dataset) };
    if memory.is_null() {
        log::warn!("dataset memory unavailable for load");
        return false;
    }
    let slice =
        unsafe { std::slice::from_raw_parts_mut(memory as *mut u8, dataset_size as usize) };
    if let Err(e) = reader.read_exact(slice) {
        log::warn!("ignoring {}: truncated payload: {}", path.display(), e);
        return false;
    }

    true
}

/// Persists the dataset for later runs. Failure here is a warning at the
/// call site, never fatal.
fn save_dataset(
    dataset: *mut ffi::randomx_dataset,
    dataset_size: u64,
    seed: &[u8],
    seed_hex: &str,
) -> io::Result<()> {
    let memory = unsafe { ffi::randomx_get_dataset_memory(dataset) };
    if memory.is_null() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "dataset memory unavailable",
        ));
    }

    let file = File::create(dataset_path(seed_hex))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&encode_header(dataset_size, seed))?;
    let slice = unsafe { std::slice::from_raw_parts(memory as *const u8, dataset_size as usize) };
    writer.write_all(slice)?;
    writer.flush()
}
