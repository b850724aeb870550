// src/job/mod.rs
//! Mining jobs
//!
//! A [`Job`] is one unit of work from the pool: a block-header blob, a
//! compact difficulty target, the seed hash selecting the RandomX epoch,
//! and bookkeeping fields. Jobs are immutable once published; workers
//! operate on snapshots handed out by the [`registry`].

/// Snapshot/epoch bookkeeping and worker wakeup.
pub mod registry;

pub use registry::{EpochPreparer, JobRegistry, WaitOutcome};

use crate::miner::target::{self, U256};
use crate::utils::error::MinerError;
use serde::Deserialize;

/// Algorithm tag sent with every share.
pub const ALGO: &str = "rx/0";

/// Byte offset of the nonce within the blob.
pub const NONCE_OFFSET: usize = 39;

/// Nonce width in bytes.
pub const NONCE_SIZE: usize = 4;

/// Minimum blob length; shorter blobs are zero-padded up to this before
/// the nonce is inserted.
pub const MIN_BLOB_LEN: usize = NONCE_OFFSET + NONCE_SIZE;

/// Wire shape of a job, as carried in a `job` notification's params or
/// the login response's `result.job`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobParams {
    /// Pool-assigned job identifier.
    pub job_id: String,
    /// Hex-encoded header template.
    pub blob: String,
    /// Compact target as 8 hex chars.
    pub target: String,
    /// Block height.
    #[serde(default)]
    pub height: u64,
    /// Hex-encoded 32-byte dataset seed.
    pub seed_hash: String,
}

/// A validated, immutable work unit.
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque pool-assigned identifier.
    pub job_id: String,
    /// Decoded header template, at least [`MIN_BLOB_LEN`] bytes.
    pub blob: Vec<u8>,
    /// The 32-bit compact target as received.
    pub compact_target: u32,
    /// Expanded 256-bit threshold; the share predicate compares against
    /// this.
    pub target: U256,
    /// Block height, informational.
    pub height: u64,
    /// Lowercase seed hash hex keying the RandomX dataset epoch.
    pub seed_hash: String,
    /// Display difficulty derived from the target.
    pub difficulty: f64,
}

impl Job {
    /// Validates wire params into a [`Job`].
    ///
    /// The blob is hex-decoded and zero-padded to [`MIN_BLOB_LEN`]; the
    /// compact target must be 32-bit hex; the seed hash must decode to
    /// 32 bytes. Malformed fields are protocol errors.
    pub fn from_params(params: JobParams) -> Result<Self, MinerError> {
        let mut blob = hex::decode(&params.blob)
            .map_err(|e| MinerError::Protocol(format!("bad blob hex: {}", e)))?;
        if blob.len() < MIN_BLOB_LEN {
            blob.resize(MIN_BLOB_LEN, 0);
        }

        let compact = u32::from_str_radix(params.target.trim_start_matches("0x"), 16)
            .map_err(|e| MinerError::Protocol(format!("bad target {:?}: {}", params.target, e)))?;

        let seed = hex::decode(&params.seed_hash)
            .map_err(|e| MinerError::Protocol(format!("bad seed hash hex: {}", e)))?;
        if seed.len() != 32 {
            return Err(MinerError::Protocol(format!(
                "seed hash must be 32 bytes, got {}",
                seed.len()
            )));
        }

        let target = target::expand_target(compact);
        Ok(Job {
            job_id: params.job_id,
            blob,
            compact_target: compact,
            target,
            height: params.height,
            seed_hash: params.seed_hash.to_lowercase(),
            difficulty: target::difficulty(target),
        })
    }

    /// The job id parsed as a decimal integer, when it is one. Used for
    /// duplicate suppression.
    pub fn numeric_id(&self) -> Option<u64> {
        self.job_id.parse().ok()
    }
}

/// Writes `nonce` big-endian into the blob's nonce window.
pub fn write_nonce(blob: &mut [u8], nonce: u32) {
    blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE].copy_from_slice(&nonce.to_be_bytes());
}

/// A candidate that met the target, ready for submission.
#[derive(Debug, Clone)]
pub struct Share {
    /// The job the nonce was found under.
    pub job_id: String,
    /// Winning nonce.
    pub nonce: u32,
    /// The 32-byte hash that met the target.
    pub hash: [u8; 32],
}

impl Share {
    /// Eight lowercase hex chars, big-endian.
    pub fn nonce_hex(&self) -> String {
        format!("{:08x}", self.nonce)
    }

    /// Sixty-four lowercase hex chars.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(job_id: &str, blob_hex: &str) -> JobParams {
        JobParams {
            job_id: job_id.into(),
            blob: blob_hex.into(),
            target: "1d00ffff".into(),
            height: 3_000_000,
            seed_hash: "ab".repeat(32),
        }
    }

    #[test]
    fn parses_and_pads_short_blob() {
        let job = Job::from_params(params("17", "0102")).unwrap();
        assert_eq!(job.blob.len(), MIN_BLOB_LEN);
        assert_eq!(&job.blob[..2], &[0x01, 0x02]);
        assert!(job.blob[2..].iter().all(|&b| b == 0));
        assert_eq!(job.numeric_id(), Some(17));
    }

    #[test]
    fn keeps_full_length_blob() {
        let blob_hex = "00".repeat(76);
        let job = Job::from_params(params("1", &blob_hex)).unwrap();
        assert_eq!(job.blob.len(), 76);
    }

    #[test]
    fn rejects_malformed_fields() {
        let mut p = params("1", "zz");
        assert!(Job::from_params(p.clone()).is_err());

        p = params("1", "0102");
        p.target = "nothex".into();
        assert!(Job::from_params(p.clone()).is_err());

        p = params("1", "0102");
        p.seed_hash = "abcd".into();
        assert!(Job::from_params(p).is_err());
    }

    #[test]
    fn computes_target_and_difficulty() {
        let job = Job::from_params(params("1", "0102")).unwrap();
        assert_eq!(job.compact_target, 0x1d00ffff);
        assert_eq!(job.target, target::expand_target(0x1d00ffff));
        assert!(job.difficulty > 0.0);
    }

    #[test]
    fn nonce_lands_big_endian_at_offset_39() {
        let mut blob = vec![0u8; 76];
        write_nonce(&mut blob, 0xdead_beef);
        assert_eq!(&blob[39..43], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(blob[..39].iter().all(|&b| b == 0));
        assert!(blob[43..].iter().all(|&b| b == 0));
    }

    #[test]
    fn share_formats_lowercase_hex() {
        let share = Share {
            job_id: "17".into(),
            nonce: 0xab,
            hash: [0xcd; 32],
        };
        assert_eq!(share.nonce_hex(), "000000ab");
        assert_eq!(share.hash_hex(), "cd".repeat(32));
    }

    #[test]
    fn hex_round_trip() {
        let bytes: Vec<u8> = (0u8..76).collect();
        assert_eq!(hex::decode(hex::encode(&bytes)).unwrap(), bytes);
    }
}
