//! Bloom filter over stored record hashes.
//!
//! The broker maintains one filter holding the base64 encoding of every
//! stored record's long hash; clients download it opaquely as base64 and
//! probe candidates locally. The export container keeps the sizing
//! parameters and sip keys alongside the bit array so a filter loaded from
//! base64 probes identically on every process.

use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};

use crate::types::ExchangeError;
use crate::utils::{from_base64, to_base64};

/// Serialised filter state.
#[derive(Serialize, Deserialize)]
struct FilterState {
    capacity: usize,
    error_rate: f64,
    bits: u64,
    hashes: u32,
    sip_keys: [(u64, u64); 2],
    bitmap: Vec<u8>,
}

/// Append-only membership filter for base64 long hashes.
pub struct RecordFilter {
    capacity: usize,
    error_rate: f64,
    bloom: Bloom<String>,
}

impl RecordFilter {
    /// Create an empty filter sized for `capacity` entries at the given
    /// false-positive rate.
    pub fn new(capacity: usize, error_rate: f64) -> Result<Self, ExchangeError> {
        if capacity == 0 || !(0.0 < error_rate && error_rate < 1.0) {
            return Err(ExchangeError::Config(format!(
                "invalid bloom filter parameters: capacity {capacity}, error rate {error_rate}"
            )));
        }
        Ok(Self {
            capacity,
            error_rate,
            bloom: Bloom::new_for_fp_rate(capacity, error_rate),
        })
    }

    /// Insert a base64 long hash. Insertion is monotone, so one writer and
    /// concurrent readers are safe at the caller's level.
    pub fn insert(&mut self, hash_b64: &str) {
        self.bloom.set(&hash_b64.to_string());
    }

    /// Probe for a base64 long hash. May report false positives at the
    /// configured rate, never false negatives.
    pub fn contains(&self, hash_b64: &str) -> bool {
        self.bloom.check(&hash_b64.to_string())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Opaque base64 export for the `/bloom` download.
    pub fn to_base64(&self) -> Result<String, ExchangeError> {
        let state = FilterState {
            capacity: self.capacity,
            error_rate: self.error_rate,
            bits: self.bloom.number_of_bits(),
            hashes: self.bloom.number_of_hash_functions(),
            sip_keys: self.bloom.sip_keys(),
            bitmap: self.bloom.bitmap(),
        };
        let raw = bincode::serialize(&state)
            .map_err(|e| ExchangeError::Resource(format!("bloom filter export: {e}")))?;
        Ok(to_base64(&raw))
    }

    /// Persist the filter container to disk (write-then-rename).
    pub fn save(&self, path: &std::path::Path) -> Result<(), ExchangeError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_base64()?)
            .map_err(|e| ExchangeError::Resource(format!("cannot write {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| ExchangeError::Resource(format!("cannot persist {path:?}: {e}")))?;
        Ok(())
    }

    /// Load a filter container from disk.
    pub fn open(path: &std::path::Path) -> Result<Self, ExchangeError> {
        let b64 = std::fs::read_to_string(path)
            .map_err(|e| ExchangeError::Resource(format!("cannot read {path:?}: {e}")))?;
        Self::load_from_base64(b64.trim())
    }

    /// Rebuild a filter from its base64 export.
    pub fn load_from_base64(b64: &str) -> Result<Self, ExchangeError> {
        let raw = from_base64(b64)?;
        let state: FilterState = bincode::deserialize(&raw)
            .map_err(|e| ExchangeError::Protocol(format!("bloom filter import: {e}")))?;
        let bloom = Bloom::from_existing(
            &state.bitmap,
            state.bits,
            state.hashes,
            state.sip_keys,
        );
        Ok(Self {
            capacity: state.capacity,
            error_rate: state.error_rate,
            bloom,
        })
    }
}
