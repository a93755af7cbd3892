//! 1-out-of-N oblivious transfer via OT extension.
//!
//! Two interchangeable configurations share one engine: a semi-honest
//! KKRT16-style mode at 128-bit payload width, and a malicious-secure
//! OOS16-style mode at 76-bit width that adds a repeated linear
//! consistency check after the correction phase.
//!
//! A session is single-threaded, owns its socket for the duration of the
//! run, and releases it on completion or error. Parallelism comes from
//! running multiple sessions on distinct ports; chunking a large request
//! into sessions of at most `OT_MAX_NUM` transfers is the orchestrator's
//! concern.

pub mod base;
pub mod extension;
pub mod receiver;
pub mod sender;

use serde::{Deserialize, Serialize};

use crate::config::ExchangeConfig;
use crate::constants::{MAGIC_OT, WIRE_VERSION};
use crate::types::ExchangeError;

pub use receiver::OtReceiverSession;
pub use sender::OtSenderSession;

/// Parameters one OT session runs under. Both endpoints must agree on all
/// of them; the handshake verifies this before any OT flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtParams {
    /// Number of transfers in this session.
    pub total_ots: usize,
    /// N: the size of the sender's message table.
    pub num_chosen_msgs: usize,
    /// Payload width of one transfer in bits.
    pub input_bit_count: u16,
    /// Selects the malicious-secure configuration.
    pub malicious_secure: bool,
    /// Consistency-check repetitions in the malicious-secure configuration.
    pub stat_sec_param: usize,
}

impl OtParams {
    /// Session parameters for a key retrieval of `total_ots` transfers
    /// under the given configuration.
    pub fn from_config(cfg: &ExchangeConfig, total_ots: usize) -> Self {
        Self {
            total_ots,
            num_chosen_msgs: cfg.ot_setsize,
            input_bit_count: cfg.effective_input_bits(),
            malicious_secure: cfg.ot_mal_secure,
            stat_sec_param: cfg.stat_sec_param,
        }
    }

    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.total_ots == 0 {
            return Err(ExchangeError::Config(
                "an OT session needs at least one transfer".into(),
            ));
        }
        if self.num_chosen_msgs < 2 {
            return Err(ExchangeError::Config(format!(
                "OT message table of {} entries is too small",
                self.num_chosen_msgs
            )));
        }
        if self.input_bit_count == 0 || self.input_bit_count > 128 {
            return Err(ExchangeError::Config(format!(
                "OT payload width out of range: {}",
                self.input_bit_count
            )));
        }
        if self.malicious_secure && self.stat_sec_param == 0 {
            return Err(ExchangeError::Config(
                "malicious-secure OT needs a statistical security parameter".into(),
            ));
        }
        Ok(())
    }

    /// Bit mask selecting the payload width.
    pub fn payload_mask(&self) -> u128 {
        mask_bits(self.input_bit_count)
    }
}

pub(crate) fn mask_bits(bits: u16) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Receiver hello opening an OT session.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OtHello {
    pub magic: [u8; 4],
    pub version: u16,
    pub params: OtParams,
}

/// Sender acknowledgement, fixing the pseudorandom code for this session.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OtHelloAck {
    pub version: u16,
    pub code_key: [u8; 32],
}

impl OtHello {
    pub fn new(params: OtParams) -> Self {
        Self {
            magic: MAGIC_OT,
            version: WIRE_VERSION,
            params,
        }
    }

    /// Check a peer hello against the locally expected parameters.
    pub fn check(&self, expected: &OtParams) -> Result<(), ExchangeError> {
        if self.magic != MAGIC_OT {
            return Err(ExchangeError::Protocol("not an OT session peer".into()));
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
