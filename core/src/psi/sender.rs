//! PSI sender session.

use std::net::TcpListener;

use rand::RngCore;
use tracing::debug;

use crate::config::TlsPaths;
use crate::ot::extension::SenderMatrix;
use crate::psi::cuckoo::{self, NUM_HASHES};
use crate::psi::{prepare_server_set, PsiHello, PsiHelloAck, PsiParams};
use crate::transport::{tag, Conn};
use crate::types::ExchangeError;

/// Sender endpoint of one PSI session.
pub struct PsiSenderSession {
    conn: Conn,
    params: PsiParams,
}

impl PsiSenderSession {
    pub fn accept(
        listener: &TcpListener,
        tls: Option<&TlsPaths>,
        params: PsiParams,
    ) -> Result<Self, ExchangeError> {
        params.validate()?;
        let conn = Conn::accept(listener, tls)?;
        Ok(Self { conn, params })
    }

    pub fn from_conn(conn: Conn, params: PsiParams) -> Result<Self, ExchangeError> {
        params.validate()?;
        Ok(Self { conn, params })
    }

    /// Run the session over the sender's raw item set. The set is
    /// deduplicated and padded with server-range dummies internally; the
    /// receiver learns which of its own items the padded set contains and
    /// nothing else.
    pub fn execute(mut self, items: &[u128]) -> Result<(), ExchangeError> {
        let padded = prepare_server_set(items, self.params.set_size, self.params.index_len)?;

        let hello: PsiHello = self.conn.recv_msg(tag::HELLO)?;
        if let Err(e) = hello.check(&self.params) {
            self.conn.abort(&e.to_string());
            return Err(e);
        }

        let mut cuckoo_seed = [0u8; 32];
        let mut code_key = [0u8; 32];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut cuckoo_seed);
        rng.fill_bytes(&mut code_key);
        let num_bins = cuckoo::num_bins(self.params.set_size);
        self.conn.send_msg(
            tag::HELLO_ACK,
            &PsiHelloAck {
                version: crate::constants::WIRE_VERSION,
                num_bins,
                cuckoo_seed,
                code_key,
            },
        )?;

        let matrix = SenderMatrix::run(&mut self.conn, code_key, num_bins, false, 0)?;

        debug!(
            set_size = padded.len(),
            bins = num_bins,
            "serving PSI evaluations"
        );
        // Evaluate every item at each of its candidate bins; sorting the
        // flat list decouples the payload from the item order.
        let mut evals: Vec<u128> = Vec::with_capacity(padded.len() * NUM_HASHES as usize);
        for &item in &padded {
            for h in 0..NUM_HASHES {
                let bin = cuckoo::bin_index(&cuckoo_seed, h, item, num_bins);
                evals.push(matrix.eval(bin, item));
            }
        }
        evals.sort_unstable();
        let mut payload = Vec::with_capacity(evals.len() * 16);
        for e in evals {
            payload.extend_from_slice(&e.to_le_bytes());
        }
        self.conn.send(tag::EVALUATIONS, &payload)?;
        debug!("PSI session complete");
        Ok(())
    }
}
