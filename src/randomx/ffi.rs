// src/randomx/ffi.rs
//! Raw bindings to the RandomX library
//!
//! Hand-written declarations for the subset of the RandomX C API this
//! miner needs: cache and dataset lifecycle, ranged dataset
//! initialization, dataset memory access for persistence, and the
//! single-shot VM hash call. The library is linked by `build.rs`
//! (`RANDOMX_LIB_DIR` / `RANDOMX_STATIC`).

#![allow(non_camel_case_types)]
#![allow(missing_docs)]

use std::os::raw::{c_ulong, c_void};

/// Bit flags accepted by the allocation and VM-creation calls.
pub type randomx_flags = i32;

pub const RANDOMX_FLAG_DEFAULT: randomx_flags = 0;
pub const RANDOMX_FLAG_LARGE_PAGES: randomx_flags = 1;
pub const RANDOMX_FLAG_HARD_AES: randomx_flags = 2;
pub const RANDOMX_FLAG_FULL_MEM: randomx_flags = 4;
pub const RANDOMX_FLAG_JIT: randomx_flags = 8;
pub const RANDOMX_FLAG_SECURE: randomx_flags = 16;

/// Hash output size in bytes.
pub const RANDOMX_HASH_SIZE: usize = 32;

/// Size of one dataset item in bytes.
pub const RANDOMX_DATASET_ITEM_SIZE: u64 = 64;

#[repr(C)]
pub struct randomx_cache {
    _private: [u8; 0],
}

#[repr(C)]
pub struct randomx_dataset {
    _private: [u8; 0],
}

#[repr(C)]
pub struct randomx_vm {
    _private: [u8; 0],
}

extern "C" {
    pub fn randomx_alloc_cache(flags: randomx_flags) -> *mut randomx_cache;
    pub fn randomx_init_cache(cache: *mut randomx_cache, key: *const c_void, key_size: usize);
    pub fn randomx_release_cache(cache: *mut randomx_cache);

    pub fn randomx_alloc_dataset(flags: randomx_flags) -> *mut randomx_dataset;
    pub fn randomx_init_dataset(
        dataset: *mut randomx_dataset,
        cache: *mut randomx_cache,
        start_item: c_ulong,
        item_count: c_ulong,
    );
    pub fn randomx_release_dataset(dataset: *mut randomx_dataset);
    pub fn randomx_dataset_item_count() -> c_ulong;
    pub fn randomx_get_dataset_memory(dataset: *mut randomx_dataset) -> *mut c_void;

    pub fn randomx_create_vm(
        flags: randomx_flags,
        cache: *mut randomx_cache,
        dataset: *mut randomx_dataset,
    ) -> *mut randomx_vm;
    pub fn randomx_destroy_vm(machine: *mut randomx_vm);
    pub fn randomx_calculate_hash(
        machine: *mut randomx_vm,
        input: *const c_void,
        input_size: usize,
        output: *mut c_void,
    );
}
