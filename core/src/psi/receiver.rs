//! PSI receiver session.

use std::collections::HashSet;

use tracing::debug;

use crate::config::TlsPaths;
use crate::ot::extension::ReceiverMatrix;
use crate::psi::cuckoo::{self, CuckooTable};
use crate::psi::{empty_bin_base, PsiHello, PsiHelloAck, PsiParams};
use crate::transport::{tag, Conn};
use crate::types::ExchangeError;

/// Receiver endpoint of one PSI session.
pub struct PsiReceiverSession {
    conn: Conn,
    params: PsiParams,
}

impl PsiReceiverSession {
    pub fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsPaths>,
        params: PsiParams,
    ) -> Result<Self, ExchangeError> {
        params.validate()?;
        let conn = Conn::connect(host, port, tls)?;
        Ok(Self { conn, params })
    }

    pub fn from_conn(conn: Conn, params: PsiParams) -> Result<Self, ExchangeError> {
        params.validate()?;
        Ok(Self { conn, params })
    }

    /// Run the session over an already padded input of exactly `set_size`
    /// distinct items. Returns the indices (into `items`) of the items
    /// present in the sender's set.
    pub fn execute(mut self, items: &[u128]) -> Result<Vec<usize>, ExchangeError> {
        if items.len() != self.params.set_size {
            return Err(ExchangeError::Config(format!(
                "PSI input of {} items does not match the session set size {}",
                items.len(),
                self.params.set_size
            )));
        }
        let distinct: HashSet<&u128> = items.iter().collect();
        if distinct.len() != items.len() {
            return Err(ExchangeError::Config(
                "PSI input must not contain duplicates".into(),
            ));
        }

        debug!(set_size = items.len(), "starting PSI session");
        self.conn
            .send_msg(tag::HELLO, &PsiHello::new(self.params))?;
        let ack: PsiHelloAck = self.conn.recv_msg(tag::HELLO_ACK)?;
        if ack.version != crate::constants::WIRE_VERSION {
            return Err(ExchangeError::Protocol(format!(
                "protocol version mismatch: peer {}, local {}",
                ack.version,
                crate::constants::WIRE_VERSION
            )));
        }
        if ack.num_bins != cuckoo::num_bins(self.params.set_size) {
            return Err(ExchangeError::Protocol(format!(
                "peer table of {} bins does not match set size {}",
                ack.num_bins, self.params.set_size
            )));
        }

        let mut table = CuckooTable::new(ack.cuckoo_seed, self.params.set_size);
        for (idx, &item) in items.iter().enumerate() {
            table.insert(item, idx)?;
        }

        // Every bin contributes one OPRF choice; unoccupied bins get a
        // marker outside both dummy ranges.
        let marker_base = empty_bin_base(self.params.index_len, self.params.set_size);
        let choices: Vec<u128> = (0..table.len())
            .map(|j| match table.slot(j) {
                Some((value, _)) => value,
                None => marker_base + j as u128,
            })
            .collect();

        let matrix = ReceiverMatrix::run(&mut self.conn, ack.code_key, &choices, false, 0)?;

        let payload = self.conn.recv_expect(tag::EVALUATIONS)?;
        if payload.len() % 16 != 0 {
            return Err(ExchangeError::Protocol(
                "malformed PSI evaluation payload".into(),
            ));
        }
        let mut sender_evals: HashSet<u128> = HashSet::with_capacity(payload.len() / 16);
        for chunk in payload.chunks_exact(16) {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(chunk);
            sender_evals.insert(u128::from_le_bytes(buf));
        }

        let mut matched = Vec::new();
        for j in 0..matrix.len() {
            if let Some((_, input_idx)) = table.slot(j) {
                if sender_evals.contains(&matrix.eval(j)) {
                    matched.push(input_idx);
                }
            }
        }
        matched.sort_unstable();
        debug!(matches = matched.len(), "PSI session complete");
        Ok(matched)
    }
}
