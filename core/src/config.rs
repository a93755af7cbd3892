//! Central configuration value.
//!
//! One explicit `ExchangeConfig` is constructed by the host and passed to
//! each component; there is no module-global state. `Default` wires in the
//! documented protocol defaults, `validate` rejects inconsistent setups
//! before any key material or network session is created.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::types::ExchangeError;

/// PSI scheme selector. KKRT16 is the implemented engine; the other names
/// are accepted in configuration for compatibility but rejected at session
/// start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsiScheme {
    Kkrt16,
    Rr16,
    Rr17,
}

impl PsiScheme {
    pub fn parse(name: &str) -> Result<Self, ExchangeError> {
        match name {
            "KKRT16" => Ok(PsiScheme::Kkrt16),
            "RR16" => Ok(PsiScheme::Rr16),
            "RR17" => Ok(PsiScheme::Rr17),
            other => Err(ExchangeError::Config(format!(
                "unknown PSI scheme: {other}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PsiScheme::Kkrt16 => "KKRT16",
            PsiScheme::Rr16 => "RR16",
            PsiScheme::Rr17 => "RR17",
        }
    }
}

/// Shape of a record: total length, identifier prefix length, and the
/// per-dimension significant-figure rounding of the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub record_length: usize,
    pub id_length: usize,
    /// One entry per identifier position; `0` means the value is exact.
    pub rounding_vec: Vec<u32>,
}

impl RecordLayout {
    pub fn new(record_length: usize, id_length: usize, rounding_vec: Vec<u32>) -> Self {
        Self {
            record_length,
            id_length,
            rounding_vec,
        }
    }

    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.id_length > self.record_length {
            return Err(ExchangeError::Config(format!(
                "identifier length {} exceeds record length {}",
                self.id_length, self.record_length
            )));
        }
        if self.rounding_vec.len() != self.id_length {
            return Err(ExchangeError::Config(format!(
                "rounding vector has {} entries for identifier length {}",
                self.rounding_vec.len(),
                self.id_length
            )));
        }
        Ok(())
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            record_length: constants::RECORD_LENGTH,
            id_length: constants::RECORD_ID_LENGTH,
            rounding_vec: vec![constants::RECORD_ROUNDING; constants::RECORD_ID_LENGTH],
        }
    }
}

/// Certificate material for the TLS-wrapped data plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsPaths {
    /// Root CA the client verifies servers against.
    pub root_ca: Option<PathBuf>,
    /// Server certificate chain (PEM).
    pub cert: Option<PathBuf>,
    /// Server private key (PEM).
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    // Key material
    pub hashkey_len: usize,
    pub enckey_len: usize,

    // OT engine
    pub ot_setsize: usize,
    pub ot_max_num: usize,
    pub ot_mal_secure: bool,
    pub ot_input_bit_count: u16,
    pub ot_tls: bool,

    // PSI engine
    pub psi_setsize: usize,
    pub psi_index_len: u32,
    pub psi_scheme: PsiScheme,
    pub psi_tls: bool,

    // Index derivation
    pub ot_index_len: u32,

    // Bloom filter
    pub bloom_capacity: usize,
    pub bloom_error_rate: f64,

    // Record shape
    pub layout: RecordLayout,

    // Consistency check repetitions (malicious-secure OT)
    pub stat_sec_param: usize,

    // Parallelism
    pub parallel: bool,
    pub max_procs: usize,

    // TLS material
    pub tls: TlsPaths,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            hashkey_len: constants::HASHKEY_LEN,
            enckey_len: constants::ENCKEY_LEN,
            ot_setsize: constants::OT_SETSIZE,
            ot_max_num: constants::OT_MAX_NUM,
            ot_mal_secure: false,
            ot_input_bit_count: constants::OT_INPUT_BIT_COUNT,
            ot_tls: false,
            psi_setsize: constants::PSI_SETSIZE,
            psi_index_len: constants::PSI_INDEX_LEN,
            psi_scheme: PsiScheme::Kkrt16,
            psi_tls: false,
            ot_index_len: constants::OT_INDEX_LEN,
            bloom_capacity: constants::BLOOM_CAPACITY,
            bloom_error_rate: constants::BLOOM_ERROR_RATE,
            layout: RecordLayout::default(),
            stat_sec_param: constants::STAT_SEC_PARAM,
            parallel: true,
            max_procs: default_max_procs(),
            tls: TlsPaths::default(),
        }
    }
}

impl ExchangeConfig {
    pub fn validate(&self) -> Result<(), ExchangeError> {
        self.layout.validate()?;
        if self.hashkey_len == 0 || self.hashkey_len % 8 != 0 {
            return Err(ExchangeError::Config(format!(
                "hash key length must be a positive multiple of 8 bits, got {}",
                self.hashkey_len
            )));
        }
        if self.enckey_len == 0 || self.enckey_len % 8 != 0 {
            return Err(ExchangeError::Config(format!(
                "encryption key length must be a positive multiple of 8 bits, got {}",
                self.enckey_len
            )));
        }
        if self.ot_index_len == 0 || self.ot_index_len > 63 {
            return Err(ExchangeError::Config(format!(
                "OT index length out of range: {}",
                self.ot_index_len
            )));
        }
        if self.psi_index_len == 0 || self.psi_index_len > 127 {
            return Err(ExchangeError::Config(format!(
                "PSI index length out of range: {}",
                self.psi_index_len
            )));
        }
        if self.ot_setsize != 1usize << self.ot_index_len {
            return Err(ExchangeError::Config(format!(
                "OT set size {} does not match 2^{} keys",
                self.ot_setsize, self.ot_index_len
            )));
        }
        if self.ot_input_bit_count == 0 || self.ot_input_bit_count > 128 {
            return Err(ExchangeError::Config(format!(
                "OT input bit count out of range: {}",
                self.ot_input_bit_count
            )));
        }
        if self.enckey_len > self.effective_input_bits() as usize {
            return Err(ExchangeError::Config(format!(
                "encryption keys of {} bits do not fit an OT payload of {} bits",
                self.enckey_len,
                self.effective_input_bits()
            )));
        }
        if self.ot_max_num == 0 {
            return Err(ExchangeError::Config(
                "OT chunk size must be at least 1".into(),
            ));
        }
        if !(0.0 < self.bloom_error_rate && self.bloom_error_rate < 1.0) {
            return Err(ExchangeError::Config(format!(
                "bloom error rate out of range: {}",
                self.bloom_error_rate
            )));
        }
        Ok(())
    }

    /// Byte width of the hash key.
    pub fn hashkey_bytes(&self) -> usize {
        self.hashkey_len / 8
    }

    /// Byte width of one encryption key in the authority's table.
    pub fn enckey_bytes(&self) -> usize {
        self.enckey_len / 8
    }

    /// Payload bit width the OT engine runs at for the configured security
    /// level.
    pub fn effective_input_bits(&self) -> u16 {
        if self.ot_mal_secure {
            constants::OT_INPUT_BIT_COUNT_MALICIOUS
        } else {
            self.ot_input_bit_count
        }
    }
}

/// Worker-process bound for parallel OT chunks.
pub fn default_max_procs() -> usize {
    (num_cpus::get() + 1) / 2
}
