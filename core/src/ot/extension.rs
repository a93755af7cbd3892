//! IKNP-style OT-extension core with a KKRT pseudorandom code.
//!
//! After the base-OT phase the receiver holds kappa seed pairs and the
//! sender holds the seed selected by its secret bit `s_i` per column. Both
//! expand the seeds into bit columns of length `m` (one bit per transfer).
//! The receiver's correction ties its coded choice into every column, so
//! that row-wise
//!
//! ```text
//! q_j = t_j XOR (C(r_j) AND s)
//! ```
//!
//! holds between the sender's matrix Q and the receiver's matrix T. The
//! per-transfer PRF `H(j, .)` then coincides exactly on the receiver's
//! choice: `H(j, t_j) == H(j, q_j XOR (C(v) AND s))` iff `C(v) == C(r_j)`.
//! This equality drives both the 1-out-of-N message masks and the OPRF
//! view the PSI engine consumes.
//!
//! The malicious-secure configuration appends an OOS-style check: the
//! sender challenges the receiver with `stat_sec` random row subsets; for
//! each subset the receiver opens the XOR of its rows and code words, and
//! the sender verifies the relation above on the aggregate. A receiver
//! that encoded inconsistent corrections passes each repetition with
//! probability 1/2.

use rand::RngCore;

use crate::constants::KAPPA;
use crate::ot::base;
use crate::transport::{tag, Conn};
use crate::types::ExchangeError;

/// Receiver-side output of the matrix phase.
pub(crate) struct ReceiverMatrix {
    t_rows: Vec<u128>,
    code_key: [u8; 32],
}

/// Sender-side output of the matrix phase.
pub(crate) struct SenderMatrix {
    q_rows: Vec<u128>,
    s_mask: u128,
    code_key: [u8; 32],
}

/// Keyed pseudorandom code mapping a choice value to a kappa-bit word.
pub(crate) fn codeword(code_key: &[u8; 32], v: u128) -> u128 {
    let h = blake3::keyed_hash(code_key, &v.to_le_bytes());
    u128::from_le_bytes(h.as_bytes()[..16].try_into().unwrap_or([0u8; 16]))
}

/// Per-transfer PRF over a kappa-bit word.
fn prf(j: u64, x: u128) -> u128 {
    let mut h = blake3::Hasher::new();
    h.update(b"ot-ext prf");
    h.update(&j.to_le_bytes());
    h.update(&x.to_le_bytes());
    u128::from_le_bytes(h.finalize().as_bytes()[..16].try_into().unwrap_or([0u8; 16]))
}

/// Expand a seed into `nbytes` of column bits.
fn prg(seed: &[u8; 32], nbytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; nbytes];
    let mut h = blake3::Hasher::new_keyed(seed);
    h.update(b"ot-ext prg");
    h.finalize_xof().fill(&mut out);
    out
}

/// Challenge row subset for repetition `l`, derived from a shared seed.
fn challenge_bits(seed: &[u8; 32], l: u32, nbytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; nbytes];
    let mut h = blake3::Hasher::new_keyed(seed);
    h.update(b"ot-ext check");
    h.update(&l.to_le_bytes());
    h.finalize_xof().fill(&mut out);
    out
}

fn col_bytes(m: usize) -> usize {
    (m + 7) / 8
}

fn get_bit(bytes: &[u8], j: usize) -> bool {
    (bytes[j / 8] >> (j % 8)) & 1 == 1
}

/// Rebuild rows from kappa bit columns.
fn transpose(cols: &[Vec<u8>], m: usize) -> Vec<u128> {
    let mut rows = vec![0u128; m];
    for (i, col) in cols.iter().enumerate() {
        for (j, row) in rows.iter_mut().enumerate() {
            if get_bit(col, j) {
                *row |= 1u128 << i;
            }
        }
    }
    rows
}

impl ReceiverMatrix {
    /// Run the receiver side of the matrix phase: base OTs (as base
    /// sender), column expansion, and the coded correction.
    pub fn run(
        conn: &mut Conn,
        code_key: [u8; 32],
        choices: &[u128],
        malicious: bool,
        stat_sec: usize,
    ) -> Result<Self, ExchangeError> {
        let m = choices.len();
        let nbytes = col_bytes(m);
        let seed_pairs = base::base_send(conn, KAPPA)?;

        let code_rows: Vec<u128> = choices.iter().map(|&r| codeword(&code_key, r)).collect();

        let mut t_cols: Vec<Vec<u8>> = Vec::with_capacity(KAPPA);
        let mut correction = Vec::with_capacity(KAPPA * nbytes);
        for (i, (k0, k1)) in seed_pairs.iter().enumerate() {
            let col0 = prg(k0, nbytes);
            let col1 = prg(k1, nbytes);
            for j in 0..nbytes {
                let mut code_byte = 0u8;
                for b in 0..8 {
                    let row = j * 8 + b;
                    if row < m && (code_rows[row] >> i) & 1 == 1 {
                        code_byte |= 1 << b;
                    }
                }
                correction.push(col0[j] ^ col1[j] ^ code_byte);
            }
            t_cols.push(col0);
        }
        conn.send(tag::CORRECTION, &correction)?;

        let t_rows = transpose(&t_cols, m);
        let matrix = Self { t_rows, code_key };

        if malicious {
            matrix.answer_check(conn, &code_rows, stat_sec)?;
        }
        Ok(matrix)
    }

    /// Answer the sender's consistency challenge.
    fn answer_check(
        &self,
        conn: &mut Conn,
        code_rows: &[u128],
        stat_sec: usize,
    ) -> Result<(), ExchangeError> {
        let payload = conn.recv_expect(tag::CHALLENGE)?;
        let seed: [u8; 32] = payload
            .as_slice()
            .try_into()
            .map_err(|_| ExchangeError::Protocol("malformed consistency challenge".into()))?;
        let m = self.t_rows.len();
        let nbytes = col_bytes(m);
        let mut openings: Vec<(u128, u128)> = Vec::with_capacity(stat_sec);
        for l in 0..stat_sec {
            let bits = challenge_bits(&seed, l as u32, nbytes);
            let mut t_agg = 0u128;
            let mut c_agg = 0u128;
            for j in 0..m {
                if get_bit(&bits, j) {
                    t_agg ^= self.t_rows[j];
                    c_agg ^= code_rows[j];
                }
            }
            openings.push((t_agg, c_agg));
        }
        conn.send_msg(tag::CHECK, &openings)
    }

    /// PRF evaluation on this transfer's own choice.
    pub fn eval(&self, j: usize) -> u128 {
        prf(j as u64, self.t_rows[j])
    }

    pub fn len(&self) -> usize {
        self.t_rows.len()
    }
}

impl SenderMatrix {
    /// Run the sender side of the matrix phase: base OTs (as base
    /// receiver, with secret column bits) and correction intake.
    pub fn run(
        conn: &mut Conn,
        code_key: [u8; 32],
        m: usize,
        malicious: bool,
        stat_sec: usize,
    ) -> Result<Self, ExchangeError> {
        let nbytes = col_bytes(m);

        let mut s_bits = vec![false; KAPPA];
        let mut s_mask = 0u128;
        let mut rng = rand::thread_rng();
        for (i, bit) in s_bits.iter_mut().enumerate() {
            *bit = rng.next_u32() & 1 == 1;
            if *bit {
                s_mask |= 1u128 << i;
            }
        }

        let seeds = base::base_receive(conn, &s_bits)?;

        let correction = conn.recv_expect(tag::CORRECTION)?;
        if correction.len() != KAPPA * nbytes {
            return Err(ExchangeError::Protocol(format!(
                "correction matrix of {} bytes does not match {} transfers",
                correction.len(),
                m
            )));
        }

        let mut q_cols: Vec<Vec<u8>> = Vec::with_capacity(KAPPA);
        for (i, seed) in seeds.iter().enumerate() {
            let mut col = prg(seed, nbytes);
            if s_bits[i] {
                let u = &correction[i * nbytes..(i + 1) * nbytes];
                for (c, &ub) in col.iter_mut().zip(u) {
                    *c ^= ub;
                }
            }
            q_cols.push(col);
        }

        let matrix = Self {
            q_rows: transpose(&q_cols, m),
            s_mask,
            code_key,
        };

        if malicious {
            matrix.verify_check(conn, stat_sec)?;
        }
        Ok(matrix)
    }

    /// Issue the consistency challenge and verify the receiver's openings.
    fn verify_check(&self, conn: &mut Conn, stat_sec: usize) -> Result<(), ExchangeError> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        conn.send(tag::CHALLENGE, &seed)?;

        let openings: Vec<(u128, u128)> = conn.recv_msg(tag::CHECK)?;
        if openings.len() != stat_sec {
            conn.abort("consistency check: wrong number of openings");
            return Err(ExchangeError::Protocol(
                "consistency check: wrong number of openings".into(),
            ));
        }
        let m = self.q_rows.len();
        let nbytes = col_bytes(m);
        for (l, (t_agg, c_agg)) in openings.iter().enumerate() {
            let bits = challenge_bits(&seed, l as u32, nbytes);
            let mut q_agg = 0u128;
            for j in 0..m {
                if get_bit(&bits, j) {
                    q_agg ^= self.q_rows[j];
                }
            }
            if q_agg != t_agg ^ (c_agg & self.s_mask) {
                conn.abort("consistency check failed");
                return Err(ExchangeError::Protocol(
                    "malicious-secure consistency check failed".into(),
                ));
            }
        }
        Ok(())
    }

    /// PRF evaluation on an arbitrary candidate value for transfer `j`.
    pub fn eval(&self, j: usize, v: u128) -> u128 {
        prf(
            j as u64,
            self.q_rows[j] ^ (codeword(&self.code_key, v) & self.s_mask),
        )
    }

    pub fn len(&self) -> usize {
        self.q_rows.len()
    }
}
