//! OT sender session.

use std::net::TcpListener;

use rand::RngCore;
use tracing::debug;

use crate::config::TlsPaths;
use crate::ot::extension::SenderMatrix;
use crate::ot::{OtHello, OtHelloAck, OtParams};
use crate::transport::{tag, Conn};
use crate::types::ExchangeError;

/// Sender endpoint of one OT session.
pub struct OtSenderSession {
    conn: Conn,
    params: OtParams,
}

impl OtSenderSession {
    /// Accept one receiver on the listener, optionally through TLS.
    pub fn accept(
        listener: &TcpListener,
        tls: Option<&TlsPaths>,
        params: OtParams,
    ) -> Result<Self, ExchangeError> {
        params.validate()?;
        let conn = Conn::accept(listener, tls)?;
        Ok(Self { conn, params })
    }

    pub fn from_conn(conn: Conn, params: OtParams) -> Result<Self, ExchangeError> {
        params.validate()?;
        Ok(Self { conn, params })
    }

    /// Serve the same message table for every transfer of the session.
    /// After completion the sender has learned nothing about the
    /// receiver's choices.
    pub fn execute_same(mut self, table: &[u128]) -> Result<(), ExchangeError> {
        if table.len() != self.params.num_chosen_msgs {
            return Err(ExchangeError::Config(format!(
                "sender holds {} messages but the session expects {}",
                table.len(),
                self.params.num_chosen_msgs
            )));
        }

        let hello: OtHello = self.conn.recv_msg(tag::HELLO)?;
        if let Err(e) = hello.check(&self.params) {
            self.conn.abort(&e.to_string());
            return Err(e);
        }

        let mut code_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut code_key);
        self.conn.send_msg(
            tag::HELLO_ACK,
            &OtHelloAck {
                version: crate::constants::WIRE_VERSION,
                code_key,
            },
        )?;

        let matrix = SenderMatrix::run(
            &mut self.conn,
            code_key,
            self.params.total_ots,
            self.params.malicious_secure,
            self.params.stat_sec_param,
        )?;

        debug!(
            total_ots = self.params.total_ots,
            table = table.len(),
            "serving OT message columns"
        );
        let mask = self.params.payload_mask();
        let mut column = vec![0u8; table.len() * 16];
        for j in 0..self.params.total_ots {
            for (v, &msg) in table.iter().enumerate() {
                let masked = (msg & mask) ^ (matrix.eval(j, v as u128) & mask);
                column[v * 16..(v + 1) * 16].copy_from_slice(&masked.to_le_bytes());
            }
            self.conn.send(tag::MESSAGES, &column)?;
        }
        debug!("OT session complete");
        Ok(())
    }
}
