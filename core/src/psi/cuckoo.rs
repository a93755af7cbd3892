//! Cuckoo hashing for the PSI receiver's items.
//!
//! Three hash functions over a shared seed place `set_size` items into
//! `ceil(1.2 * set_size)` bins with negligible failure probability. Every
//! bin holds at most one item; insertion evicts along a bounded walk.

use crate::constants::{CUCKOO_EXPANSION, CUCKOO_MAX_EVICTIONS};
use crate::types::ExchangeError;

/// Number of hash functions.
pub const NUM_HASHES: u8 = 3;

/// Table size for a set of `set_size` items.
pub fn num_bins(set_size: usize) -> usize {
    ((set_size as f64 * CUCKOO_EXPANSION).ceil() as usize).max(NUM_HASHES as usize)
}

/// Bin of `value` under hash function `hash_idx` and the shared seed.
pub fn bin_index(seed: &[u8; 32], hash_idx: u8, value: u128, bins: usize) -> usize {
    let mut h = blake3::Hasher::new_keyed(seed);
    h.update(b"cuckoo");
    h.update(&[hash_idx]);
    h.update(&value.to_le_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&h.finalize().as_bytes()[..8]);
    (u64::from_le_bytes(buf) % bins as u64) as usize
}

/// One receiver-side table: each occupied bin remembers the item and its
/// index in the input array.
pub struct CuckooTable {
    seed: [u8; 32],
    bins: Vec<Option<(u128, usize)>>,
}

impl CuckooTable {
    pub fn new(seed: [u8; 32], set_size: usize) -> Self {
        Self {
            seed,
            bins: vec![None; num_bins(set_size)],
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Insert one distinct item, evicting along a bounded walk.
    pub fn insert(&mut self, value: u128, input_index: usize) -> Result<(), ExchangeError> {
        let bins = self.bins.len();
        let mut cur = (value, input_index);
        let mut evict_hash = 0u8;
        for _ in 0..CUCKOO_MAX_EVICTIONS {
            for h in 0..NUM_HASHES {
                let b = bin_index(&self.seed, h, cur.0, bins);
                if self.bins[b].is_none() {
                    self.bins[b] = Some(cur);
                    return Ok(());
                }
            }
            let b = bin_index(&self.seed, evict_hash, cur.0, bins);
            match self.bins[b].replace(cur) {
                Some(prev) => cur = prev,
                None => return Ok(()),
            }
            evict_hash = (evict_hash + 1) % NUM_HASHES;
        }
        Err(ExchangeError::Resource(
            "cuckoo insertion failed: eviction limit reached".into(),
        ))
    }

    /// Slot contents of bin `j`.
    pub fn slot(&self, j: usize) -> Option<(u128, usize)> {
        self.bins[j]
    }
}
