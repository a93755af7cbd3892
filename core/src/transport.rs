//! Session transport for the OT/PSI data plane.
//!
//! Binary, session-oriented framing over TCP with an optional TLS 1.2 wrap
//! (ECDHE-RSA-AES256-GCM-SHA384). Frames are `[len: u32 BE][tag: u8]
//! [payload]`; payloads are bincode-encoded structs. The protocol version
//! handshake runs before any cryptographic material flows, and a mismatch
//! aborts the session with a protocol error.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, ServerConnection, StreamOwned};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::TlsPaths;
use crate::constants::MAX_FRAME_LEN;
use crate::types::ExchangeError;

/// Frame tags of the session protocols.
pub mod tag {
    pub const HELLO: u8 = 0x01;
    pub const HELLO_ACK: u8 = 0x02;
    pub const BASE_POINT: u8 = 0x03;
    pub const BASE_KEYS: u8 = 0x04;
    pub const CORRECTION: u8 = 0x05;
    pub const CHALLENGE: u8 = 0x06;
    pub const CHECK: u8 = 0x07;
    pub const MESSAGES: u8 = 0x08;
    pub const EVALUATIONS: u8 = 0x09;
    pub const ERROR: u8 = 0xFF;
}

/// One endpoint of a session: plain TCP or a TLS stream.
pub enum Conn {
    Plain(TcpStream),
    TlsClient(Box<StreamOwned<ClientConnection, TcpStream>>),
    TlsServer(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Conn::Plain(s) => s.read(buf),
            Conn::TlsClient(s) => s.read(buf),
            Conn::TlsServer(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Conn::Plain(s) => s.write(buf),
            Conn::TlsClient(s) => s.write(buf),
            Conn::TlsServer(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Conn::Plain(s) => s.flush(),
            Conn::TlsClient(s) => s.flush(),
            Conn::TlsServer(s) => s.flush(),
        }
    }
}

impl Conn {
    /// Connect to a session endpoint, optionally wrapped in TLS verified
    /// against the configured root CA.
    pub fn connect(host: &str, port: u16, tls: Option<&TlsPaths>) -> Result<Self, ExchangeError> {
        let stream = TcpStream::connect((host, port))?;
        match tls {
            None => Ok(Conn::Plain(stream)),
            Some(paths) => {
                let config = client_tls_config(paths)?;
                let name = ServerName::try_from(host.to_string())
                    .map_err(|e| ExchangeError::Protocol(format!("invalid server name: {e}")))?;
                let conn = ClientConnection::new(config, name)
                    .map_err(|e| ExchangeError::Protocol(format!("TLS client setup: {e}")))?;
                Ok(Conn::TlsClient(Box::new(StreamOwned::new(conn, stream))))
            }
        }
    }

    /// Accept one session on the listener, optionally presenting the
    /// configured certificate.
    pub fn accept(
        listener: &TcpListener,
        tls: Option<&TlsPaths>,
    ) -> Result<Self, ExchangeError> {
        let (stream, _) = listener.accept()?;
        match tls {
            None => Ok(Conn::Plain(stream)),
            Some(paths) => {
                let config = server_tls_config(paths)?;
                let conn = ServerConnection::new(config)
                    .map_err(|e| ExchangeError::Protocol(format!("TLS server setup: {e}")))?;
                Ok(Conn::TlsServer(Box::new(StreamOwned::new(conn, stream))))
            }
        }
    }

    /// Write one frame.
    pub fn send(&mut self, frame_tag: u8, payload: &[u8]) -> Result<(), ExchangeError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(ExchangeError::Resource(format!(
                "frame of {} bytes exceeds the transport limit",
                payload.len()
            )));
        }
        self.write_u32::<BigEndian>(payload.len() as u32)?;
        self.write_u8(frame_tag)?;
        self.write_all(payload)?;
        self.flush()?;
        Ok(())
    }

    /// Read one frame. An `ERROR` frame from the peer is surfaced as a
    /// protocol error carrying the peer's message.
    pub fn recv(&mut self) -> Result<(u8, Vec<u8>), ExchangeError> {
        let len = self.read_u32::<BigEndian>()? as usize;
        if len > MAX_FRAME_LEN {
            return Err(ExchangeError::Protocol(format!(
                "peer announced a frame of {len} bytes"
            )));
        }
        let frame_tag = self.read_u8()?;
        let mut payload = vec![0u8; len];
        self.read_exact(&mut payload)?;
        if frame_tag == tag::ERROR {
            let msg = String::from_utf8_lossy(&payload).into_owned();
            return Err(ExchangeError::Protocol(format!("peer aborted: {msg}")));
        }
        Ok((frame_tag, payload))
    }

    /// Read one frame and require the given tag.
    pub fn recv_expect(&mut self, expected: u8) -> Result<Vec<u8>, ExchangeError> {
        let (frame_tag, payload) = self.recv()?;
        if frame_tag != expected {
            return Err(ExchangeError::Protocol(format!(
                "expected frame 0x{expected:02x}, got 0x{frame_tag:02x}"
            )));
        }
        Ok(payload)
    }

    /// Send a bincode-encoded message frame.
    pub fn send_msg<T: Serialize>(&mut self, frame_tag: u8, msg: &T) -> Result<(), ExchangeError> {
        let payload = bincode::serialize(msg)?;
        self.send(frame_tag, &payload)
    }

    /// Receive and decode a bincode message frame of the given tag.
    pub fn recv_msg<T: DeserializeOwned>(&mut self, expected: u8) -> Result<T, ExchangeError> {
        let payload = self.recv_expect(expected)?;
        Ok(bincode::deserialize(&payload)?)
    }

    /// Tell the peer why the session is being aborted, ignoring transport
    /// failures on the way out.
    pub fn abort(&mut self, msg: &str) {
        let _ = self.send(tag::ERROR, msg.as_bytes());
    }
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ExchangeError> {
    let file = File::open(path)
        .map_err(|e| ExchangeError::Config(format!("cannot open certificate {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ExchangeError::Config(format!("invalid certificate {path:?}: {e}")))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ExchangeError> {
    let file = File::open(path)
        .map_err(|e| ExchangeError::Config(format!("cannot open key {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ExchangeError::Config(format!("invalid key {path:?}: {e}")))?
        .ok_or_else(|| ExchangeError::Config(format!("no private key in {path:?}")))
}

/// TLS 1.2 client configuration verifying against the provided root CA.
pub fn client_tls_config(paths: &TlsPaths) -> Result<Arc<rustls::ClientConfig>, ExchangeError> {
    let root_ca = paths
        .root_ca
        .as_ref()
        .ok_or_else(|| ExchangeError::Config("TLS requested but no root CA configured".into()))?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(root_ca)? {
        roots
            .add(cert)
            .map_err(|e| ExchangeError::Config(format!("invalid root CA: {e}")))?;
    }
    let config = rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// TLS 1.2 server configuration presenting the configured certificate.
pub fn server_tls_config(paths: &TlsPaths) -> Result<Arc<rustls::ServerConfig>, ExchangeError> {
    let cert_path = paths
        .cert
        .as_ref()
        .ok_or_else(|| ExchangeError::Config("TLS requested but no certificate configured".into()))?;
    let key_path = paths
        .key
        .as_ref()
        .ok_or_else(|| ExchangeError::Config("TLS requested but no key configured".into()))?;
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let config = rustls::ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ExchangeError::Config(format!("invalid certificate chain: {e}")))?;
    Ok(Arc::new(config))
}
