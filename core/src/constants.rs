//! Protocol constants and configuration defaults.
//!
//! Everything here is a default: runtime values live in
//! [`crate::config::ExchangeConfig`] and are passed explicitly to each
//! component.

/// Hash key length in bits.
pub const HASHKEY_LEN: usize = 128;

/// Encryption (exchange) key length in bits.
pub const ENCKEY_LEN: usize = 128;

/// Size of the key authority's encryption-key table. One key per possible
/// OT index, so this must equal `2^OT_INDEX_LEN`.
pub const OT_SETSIZE: usize = 1 << 20;

/// Maximal number of transfers in a single OT session. Larger requests are
/// split into independent sessions.
pub const OT_MAX_NUM: usize = 10;

/// Payload width of one transfer in bits. 128 for the semi-honest
/// configuration, 76 for the malicious-secure one.
pub const OT_INPUT_BIT_COUNT: u16 = 128;
pub const OT_INPUT_BIT_COUNT_MALICIOUS: u16 = 76;

/// Number of base OTs seeding the extension.
pub const KAPPA: usize = 128;

/// Statistical security parameter (consistency-check repetitions in the
/// malicious-secure configuration).
pub const STAT_SEC_PARAM: usize = 40;

/// Maximal PSI set size on either side.
pub const PSI_SETSIZE: usize = 1 << 20;

/// Bit width of a PSI item. 127 so that the remainder of the 128-bit
/// integer domain is available for padding dummies.
pub const PSI_INDEX_LEN: u32 = 127;

/// Bit width of an OT selection index.
pub const OT_INDEX_LEN: u32 = 20;

/// Cuckoo table expansion factor for three hash functions.
pub const CUCKOO_EXPANSION: f64 = 1.2;

/// Maximal evictions before a cuckoo insertion is declared failed.
pub const CUCKOO_MAX_EVICTIONS: usize = 500;

/// Bloom filter defaults.
pub const BLOOM_CAPACITY: usize = 100_000;
pub const BLOOM_ERROR_RATE: f64 = 1e-8;

/// Record layout defaults.
pub const RECORD_LENGTH: usize = 100;
pub const RECORD_ID_LENGTH: usize = 10;
pub const RECORD_ROUNDING: u32 = 3;

/// On-disk state of the key authority and broker.
pub const HASHKEY_FILE: &str = "hash_key.bin";
pub const ENCKEYS_FILE: &str = "encryption_keys.bin";
pub const BLOOM_FILE: &str = "bloom.filter";

/// Wire magics for the session-oriented binary protocols.
pub const MAGIC_OT: [u8; 4] = *b"OTX1";
pub const MAGIC_PSI: [u8; 4] = *b"PSI1";

/// Wire protocol revision, checked during the session handshake.
pub const WIRE_VERSION: u16 = 1;

/// Upper bound on a single wire frame. A frame carrying all `2^20` masked
/// message columns of one transfer stays well below this.
pub const MAX_FRAME_LEN: usize = 1 << 28;
