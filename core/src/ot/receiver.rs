//! OT receiver session.

use tracing::debug;

use crate::config::TlsPaths;
use crate::ot::extension::ReceiverMatrix;
use crate::ot::{OtHello, OtHelloAck, OtParams};
use crate::transport::{tag, Conn};
use crate::types::ExchangeError;

/// Receiver endpoint of one OT session.
///
/// The session owns its connection; `execute` consumes the session and the
/// socket is released when it returns, successfully or not. Partial
/// results are never surfaced.
pub struct OtReceiverSession {
    conn: Conn,
    params: OtParams,
}

impl OtReceiverSession {
    /// Connect to a sender endpoint, optionally through TLS.
    pub fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsPaths>,
        params: OtParams,
    ) -> Result<Self, ExchangeError> {
        params.validate()?;
        let conn = Conn::connect(host, port, tls)?;
        Ok(Self { conn, params })
    }

    /// Wrap an already-established connection (used by tests and by hosts
    /// that manage their own sockets).
    pub fn from_conn(conn: Conn, params: OtParams) -> Result<Self, ExchangeError> {
        params.validate()?;
        Ok(Self { conn, params })
    }

    /// Run the session: for every `k`, obtain `sender_table[choices[k]]`
    /// as an integer of `input_bit_count` bits. The sender learns nothing
    /// about `choices`.
    pub fn execute(mut self, choices: &[u64]) -> Result<Vec<u128>, ExchangeError> {
        if choices.len() != self.params.total_ots {
            return Err(ExchangeError::Config(format!(
                "{} choices for a session of {} transfers",
                choices.len(),
                self.params.total_ots
            )));
        }
        if let Some(&bad) = choices
            .iter()
            .find(|&&c| c as u128 >= self.params.num_chosen_msgs as u128)
        {
            return Err(ExchangeError::Config(format!(
                "choice {bad} out of range for a table of {} messages",
                self.params.num_chosen_msgs
            )));
        }

        debug!(total_ots = self.params.total_ots, "starting OT session");
        self.conn.send_msg(tag::HELLO, &OtHello::new(self.params))?;
        let ack: OtHelloAck = self.conn.recv_msg(tag::HELLO_ACK)?;
        if ack.version != crate::constants::WIRE_VERSION {
            return Err(ExchangeError::Protocol(format!(
                "protocol version mismatch: peer {}, local {}",
                ack.version,
                crate::constants::WIRE_VERSION
            )));
        }

        let coded_choices: Vec<u128> = choices.iter().map(|&c| c as u128).collect();
        let matrix = ReceiverMatrix::run(
            &mut self.conn,
            ack.code_key,
            &coded_choices,
            self.params.malicious_secure,
            self.params.stat_sec_param,
        )?;

        let mask = self.params.payload_mask();
        let mut received = Vec::with_capacity(choices.len());
        for (j, &choice) in choices.iter().enumerate() {
            let column = self.conn.recv_expect(tag::MESSAGES)?;
            if column.len() != self.params.num_chosen_msgs * 16 {
                return Err(ExchangeError::Protocol(format!(
                    "message column of {} bytes does not hold {} entries",
                    column.len(),
                    self.params.num_chosen_msgs
                )));
            }
            let at = choice as usize * 16;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&column[at..at + 16]);
            let masked = u128::from_le_bytes(buf);
            received.push((masked ^ matrix.eval(j)) & mask);
        }
        debug!(transfers = received.len(), "OT session complete");
        Ok(received)
    }
}
