//! Private set intersection layered on the OT-extension core.
//!
//! KKRT16-style: the receiver cuckoo-hashes its items into bins, the
//! extension turns every bin into an OPRF evaluation, and the sender ships
//! the evaluations of its own set under all three bin hashes. Equal PRF
//! outputs reveal intersection positions and nothing else.
//!
//! Both sides pad to the fixed set size with dummies drawn from disjoint
//! ranges above the 127-bit item domain, so dummies can never collide with
//! real items or with each other.

pub mod cuckoo;
pub mod receiver;
pub mod sender;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::PsiScheme;
use crate::constants::{MAGIC_PSI, WIRE_VERSION};
use crate::types::ExchangeError;

pub use receiver::PsiReceiverSession;
pub use sender::PsiSenderSession;

/// Parameters one PSI session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsiParams {
    /// Fixed (padded) size of both input sets.
    pub set_size: usize,
    pub scheme: PsiScheme,
    /// Bit width of a real item; dummies live above this domain.
    pub index_len: u32,
}

impl PsiParams {
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.set_size == 0 {
            return Err(ExchangeError::Config("PSI set size must be positive".into()));
        }
        if self.index_len == 0 || self.index_len > 127 {
            return Err(ExchangeError::Config(format!(
                "PSI item width out of range: {}",
                self.index_len
            )));
        }
        if self.scheme != PsiScheme::Kkrt16 {
            return Err(ExchangeError::Config(format!(
                "PSI scheme {} is not supported by this engine",
                self.scheme.name()
            )));
        }
        Ok(())
    }
}

/// First dummy value used by the sender (server) side.
pub fn server_dummy_base(index_len: u32) -> u128 {
    1u128 << index_len
}

/// First dummy value used by the receiver (client) side; disjoint from the
/// server range.
pub fn client_dummy_base(index_len: u32, set_size: usize) -> u128 {
    server_dummy_base(index_len) + set_size as u128
}

/// Marker range for unoccupied cuckoo bins, above both dummy ranges.
pub(crate) fn empty_bin_base(index_len: u32, set_size: usize) -> u128 {
    client_dummy_base(index_len, set_size) + set_size as u128
}

fn dedup(items: &[u128]) -> Vec<u128> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for &x in items {
        if seen.insert(x) {
            out.push(x);
        }
    }
    out
}

/// Deduplicate and pad a client set to exactly `set_size` items with
/// client-range dummies. Fails with `CapacityExceeded` before any network
/// I/O when the deduplicated set does not fit.
pub fn prepare_client_set(
    items: &[u128],
    set_size: usize,
    index_len: u32,
) -> Result<Vec<u128>, ExchangeError> {
    let mut set = dedup(items);
    if set.len() > set_size {
        return Err(ExchangeError::CapacityExceeded {
            actual: set.len(),
            limit: set_size,
        });
    }
    let mut dummy = client_dummy_base(index_len, set_size);
    while set.len() < set_size {
        set.push(dummy);
        dummy += 1;
    }
    Ok(set)
}

/// Deduplicate and pad a server set with server-range dummies.
pub fn prepare_server_set(
    items: &[u128],
    set_size: usize,
    index_len: u32,
) -> Result<Vec<u128>, ExchangeError> {
    let mut set = dedup(items);
    if set.len() > set_size {
        return Err(ExchangeError::CapacityExceeded {
            actual: set.len(),
            limit: set_size,
        });
    }
    let mut dummy = server_dummy_base(index_len);
    while set.len() < set_size {
        set.push(dummy);
        dummy += 1;
    }
    Ok(set)
}

/// Receiver hello opening a PSI session.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PsiHello {
    pub magic: [u8; 4],
    pub version: u16,
    pub params: PsiParams,
}

/// Sender acknowledgement carrying the shared table layout and code.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PsiHelloAck {
    pub version: u16,
    pub num_bins: usize,
    pub cuckoo_seed: [u8; 32],
    pub code_key: [u8; 32],
}

impl PsiHello {
    pub fn new(params: PsiParams) -> Self {
        Self {
            magic: MAGIC_PSI,
            version: WIRE_VERSION,
            params,
        }
    }

    pub fn check(&self, expected: &PsiParams) -> Result<(), ExchangeError> {
        if self.magic != MAGIC_PSI {
            return Err(ExchangeError::Protocol("not a PSI session peer".into()));
        }
        if self.version != WIRE_VERSION {
            return Err(ExchangeError::Protocol(format!(
                "protocol version mismatch: peer {}, local {}",
                self.version, WIRE_VERSION
            )));
        }
        if self.params != *expected {
            return Err(ExchangeError::Protocol(format!(
                "session parameter mismatch: peer {:?}, local {:?}",
                self.params, expected
            )));
        }
        Ok(())
    }
}
