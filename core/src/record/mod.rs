//! Rounded-record codec.
//!
//! A record is an ordered vector of doubles whose configured identifier
//! prefix is rounded per dimension, canonically encoded, and hashed with a
//! keyed SHA3-512. The low bits of that long hash select the PSI item and
//! the OT key slot. Derived hashes are computed on demand and cached.

pub mod envelope;
pub mod rounding;

use std::cell::OnceCell;
use std::fmt;

use sha3::{Digest, Sha3_512};

use crate::config::RecordLayout;
use crate::types::ExchangeError;
use crate::utils::to_base64;

pub use envelope::CiphertextEnvelope;
pub use rounding::{power_of, round_sig, smallest_step};

/// Byte width of the long hash (SHA3-512).
pub const LONG_HASH_LEN: usize = 64;

/// Round the identifier prefix of a record according to the layout:
/// (11.1, 222.2, 3333.33) -> (1.11, 222.0, 3330.0) for rounding 3.
pub fn round_record(values: &[f64], layout: &RecordLayout) -> Vec<f64> {
    values[..layout.id_length]
        .iter()
        .zip(&layout.rounding_vec)
        .map(|(&v, &rnd)| round_sig(v, rnd))
        .collect()
}

/// Canonical byte encoding of a rounded identifier: the UTF-8 text of the
/// element list, e.g. `[1.1, 22.2, 333.0]`. Shortest round-trip float
/// formatting with a trailing `.0` on integral values; this exact shape is
/// covered by the keyed hash and must match across client and provider.
pub fn canonical_id(rounded: &[f64]) -> String {
    let mut out = String::from("[");
    for (i, v) in rounded.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{v:?}"));
    }
    out.push(']');
    out
}

/// Extract a little-endian index of `bit_len` bits from the low end of a
/// hash value. Sub-byte overhang takes the low bits of the next byte, so a
/// 127-bit index uses 15 full bytes plus 7 bits of the 16th.
pub fn hash_to_index(hash: &[u8], bit_len: u32) -> u128 {
    debug_assert!(bit_len <= 128);
    let byte_len = (bit_len / 8) as usize;
    let overhang = bit_len % 8;
    let mut num: u128 = 0;
    for (i, &b) in hash[..byte_len].iter().enumerate() {
        num |= (b as u128) << (8 * i);
    }
    if overhang != 0 {
        let masked = hash[byte_len] & ((1u8 << overhang) - 1);
        num |= (masked as u128) << (8 * byte_len);
    }
    num
}

/// One data record with its lazily derived hashes.
#[derive(Debug, Clone)]
pub struct Record {
    values: Vec<f64>,
    owner: Option<String>,
    hash_key: Option<Vec<u8>>,
    long_hash: OnceCell<[u8; LONG_HASH_LEN]>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if self.owner.is_some() && other.owner.is_some() {
            self.values == other.values && self.owner == other.owner
        } else {
            self.values == other.values
        }
    }
}

impl Record {
    /// Create a record, validating its arity against the layout.
    pub fn new(values: Vec<f64>, layout: &RecordLayout) -> Result<Self, ExchangeError> {
        if values.len() != layout.record_length {
            return Err(ExchangeError::Config(format!(
                "record has {} elements, layout expects {}",
                values.len(),
                layout.record_length
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ExchangeError::Config(
                "records must only contain finite numbers".into(),
            ));
        }
        Ok(Self {
            values,
            owner: None,
            hash_key: None,
            long_hash: OnceCell::new(),
        })
    }

    pub fn with_hash_key(
        values: Vec<f64>,
        hash_key: &[u8],
        layout: &RecordLayout,
    ) -> Result<Self, ExchangeError> {
        let mut r = Self::new(values, layout)?;
        r.set_hash_key(hash_key);
        Ok(r)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = Some(owner.into());
    }

    /// Define the key used in hashing. Clears a previously cached hash.
    pub fn set_hash_key(&mut self, key: &[u8]) {
        self.hash_key = Some(key.to_vec());
        self.long_hash = OnceCell::new();
    }

    pub fn rounded_id(&self, layout: &RecordLayout) -> Vec<f64> {
        round_record(&self.values, layout)
    }

    /// The 512-bit keyed hash over the canonical rounded identifier:
    /// `SHA3-512(hash_key || canonical(rounded_id))`. Independent of the
    /// payload suffix. Computed once and cached.
    pub fn long_hash(&self, layout: &RecordLayout) -> Result<&[u8; LONG_HASH_LEN], ExchangeError> {
        let key = self.hash_key.as_ref().ok_or_else(|| {
            ExchangeError::Config("the hash key has to be set before hashes can be computed".into())
        })?;
        Ok(self.long_hash.get_or_init(|| {
            let mut m = Sha3_512::new();
            m.update(key);
            m.update(canonical_id(&round_record(&self.values, layout)).as_bytes());
            let mut out = [0u8; LONG_HASH_LEN];
            out.copy_from_slice(&m.finalize());
            out
        }))
    }

    /// Base64 of the long hash, the form used by the bloom filter and the
    /// broker's storage keys.
    pub fn long_hash_b64(&self, layout: &RecordLayout) -> Result<String, ExchangeError> {
        Ok(to_base64(self.long_hash(layout)?))
    }

    /// PSI item derived from the low bits of the long hash.
    pub fn psi_index(
        &self,
        layout: &RecordLayout,
        psi_index_len: u32,
    ) -> Result<u128, ExchangeError> {
        Ok(hash_to_index(self.long_hash(layout)?, psi_index_len))
    }

    /// Selection index into the encryption-key table.
    pub fn ot_index(&self, layout: &RecordLayout, ot_index_len: u32) -> Result<u64, ExchangeError> {
        Ok(hash_to_index(self.long_hash(layout)?, ot_index_len) as u64)
    }

    /// Encrypt the full record under the given exchange key.
    pub fn encrypt(
        &self,
        exchange_key: &[u8],
        layout: &RecordLayout,
    ) -> Result<CiphertextEnvelope, ExchangeError> {
        let hash = *self.long_hash(layout)?;
        envelope::encrypt(&self.values, &hash, exchange_key)
    }

    /// The triple handed to the broker on ingest:
    /// `(base64(long_hash), envelope, owner)`.
    pub fn upload_format(
        &self,
        exchange_key: &[u8],
        layout: &RecordLayout,
    ) -> Result<(String, CiphertextEnvelope, String), ExchangeError> {
        let owner = self
            .owner
            .clone()
            .ok_or_else(|| ExchangeError::Config("record has no owner".into()))?;
        Ok((
            self.long_hash_b64(layout)?,
            self.encrypt(exchange_key, layout)?,
            owner,
        ))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.long_hash.get(), &self.owner) {
            (Some(h), Some(o)) => {
                write!(f, "(0x{}, {:?}, {})", hex::encode(h), self.values, o)
            }
            (Some(h), None) => write!(f, "(0x{}, {:?})", hex::encode(h), self.values),
            (None, Some(o)) => write!(f, "({:?}, {})", self.values, o),
            (None, None) => write!(f, "({:?})", self.values),
        }
    }
}
