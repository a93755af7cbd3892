//! Small shared helpers: transport encodings, key conversions, ports.

use std::net::TcpListener;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::types::ExchangeError;

/// Encode bytes for JSON transport.
pub fn to_base64(b: &[u8]) -> String {
    STANDARD.encode(b)
}

/// Decode a base64 transport string back into bytes.
pub fn from_base64(b64: &str) -> Result<Vec<u8>, ExchangeError> {
    STANDARD
        .decode(b64)
        .map_err(|e| ExchangeError::Protocol(format!("invalid base64: {e}")))
}

/// Convert OT payload integers into fixed-width big-endian keys.
pub fn keys_from_ints(values: &[u128], key_bytes: usize) -> Vec<Vec<u8>> {
    values
        .iter()
        .map(|v| v.to_be_bytes()[16 - key_bytes..].to_vec())
        .collect()
}

/// Convert fixed-width big-endian keys into OT payload integers.
pub fn ints_from_keys<K: AsRef<[u8]>>(keys: &[K]) -> Vec<u128> {
    keys.iter()
        .map(|k| {
            let k = k.as_ref();
            let mut buf = [0u8; 16];
            buf[16 - k.len()..].copy_from_slice(k);
            u128::from_be_bytes(buf)
        })
        .collect()
}

/// HTTP basic auth header value for a username and one-time token.
pub fn basic_auth_header(user: &str, token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{token}")))
}

/// Ask the OS for a free TCP port on the loopback interface.
pub fn free_port() -> Result<u16, ExchangeError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| ExchangeError::Resource(format!("no free port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| ExchangeError::Resource(format!("no free port: {e}")))?
        .port();
    Ok(port)
}
