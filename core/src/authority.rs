//! Key authority backend.
//!
//! Owns the process-wide hash key and the fixed table of encryption keys,
//! one per possible OT index. Both are created once and persisted;
//! rotating either invalidates every stored ciphertext, so load never
//! regenerates silently. Files are written via write-then-rename so a
//! crash cannot leave partial key material behind.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::info;

use crate::config::ExchangeConfig;
use crate::constants::{ENCKEYS_FILE, HASHKEY_FILE};
use crate::ot::{OtParams, OtSenderSession};
use crate::types::ExchangeError;
use crate::utils::ints_from_keys;

pub struct KeyAuthority {
    data_dir: PathBuf,
    hash_key: Vec<u8>,
    enc_keys: Vec<Vec<u8>>,
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ExchangeError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .map_err(|e| ExchangeError::Resource(format!("cannot write {tmp:?}: {e}")))?;
    fs::rename(&tmp, path)
        .map_err(|e| ExchangeError::Resource(format!("cannot persist {path:?}: {e}")))?;
    Ok(())
}

fn gen_key(bit_length: usize) -> Result<Vec<u8>, ExchangeError> {
    if bit_length == 0 || bit_length % 8 != 0 {
        return Err(ExchangeError::Config(format!(
            "key length must be a positive multiple of 8 bits, got {bit_length}"
        )));
    }
    let mut key = vec![0u8; bit_length / 8];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(key)
}

impl KeyAuthority {
    /// Load the key material from `data_dir`, generating and persisting it
    /// on first use. Existing files are validated against the configured
    /// key widths and table size.
    pub fn load_or_generate(
        data_dir: &Path,
        cfg: &ExchangeConfig,
    ) -> Result<Self, ExchangeError> {
        cfg.validate()?;
        fs::create_dir_all(data_dir)
            .map_err(|e| ExchangeError::Resource(format!("cannot create {data_dir:?}: {e}")))?;

        let hash_path = data_dir.join(HASHKEY_FILE);
        let hash_key = if hash_path.exists() {
            info!(path = ?hash_path, "loading hash key");
            let bytes = fs::read(&hash_path)
                .map_err(|e| ExchangeError::Resource(format!("cannot read {hash_path:?}: {e}")))?;
            if bytes.len() != cfg.hashkey_bytes() {
                return Err(ExchangeError::Config(format!(
                    "hash key file holds {} bytes, configuration expects {}",
                    bytes.len(),
                    cfg.hashkey_bytes()
                )));
            }
            bytes
        } else {
            info!("no hash key file found, generating");
            let key = gen_key(cfg.hashkey_len)?;
            atomic_write(&hash_path, &key)?;
            key
        };

        let keys_path = data_dir.join(ENCKEYS_FILE);
        let key_bytes = cfg.enckey_bytes();
        let enc_keys = if keys_path.exists() {
            info!(path = ?keys_path, "loading encryption keys");
            let bytes = fs::read(&keys_path)
                .map_err(|e| ExchangeError::Resource(format!("cannot read {keys_path:?}: {e}")))?;
            if bytes.len() != cfg.ot_setsize * key_bytes {
                return Err(ExchangeError::Config(format!(
                    "encryption key file holds {} bytes, configuration expects {} keys of {} bytes",
                    bytes.len(),
                    cfg.ot_setsize,
                    key_bytes
                )));
            }
            bytes.chunks_exact(key_bytes).map(|c| c.to_vec()).collect()
        } else {
            info!(count = cfg.ot_setsize, "no key file found, generating encryption keys");
            let mut keys = Vec::with_capacity(cfg.ot_setsize);
            let mut flat = Vec::with_capacity(cfg.ot_setsize * key_bytes);
            for _ in 0..cfg.ot_setsize {
                let key = gen_key(cfg.enckey_len)?;
                flat.extend_from_slice(&key);
                keys.push(key);
            }
            atomic_write(&keys_path, &flat)?;
            keys
        };

        info!("key authority initialization completed");
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            hash_key,
            enc_keys,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn hash_key(&self) -> &[u8] {
        &self.hash_key
    }

    /// The full table, stable order, read-only after initialization.
    pub fn encryption_keys(&self) -> &[Vec<u8>] {
        &self.enc_keys
    }

    /// The i-th key selected by `ot_index = i`.
    pub fn key_at(&self, ot_index: u64) -> Option<&[u8]> {
        self.enc_keys.get(ot_index as usize).map(|k| k.as_slice())
    }

    /// Serve one key-retrieval OT session on the listener: the peer
    /// obtains the keys for its chosen indices, this side learns nothing
    /// about the choices.
    pub fn serve_key_retrieval(
        &self,
        listener: &TcpListener,
        cfg: &ExchangeConfig,
        total_ots: usize,
    ) -> Result<(), ExchangeError> {
        if self.enc_keys.len() != cfg.ot_setsize {
            return Err(ExchangeError::Config(format!(
                "key authority has {} keys but the OT set size is {}",
                self.enc_keys.len(),
                cfg.ot_setsize
            )));
        }
        let params = OtParams::from_config(cfg, total_ots);
        let tls = cfg.ot_tls.then_some(&cfg.tls);
        let session = OtSenderSession::accept(listener, tls, params)?;
        session.execute_same(&ints_from_keys(&self.enc_keys))
    }
}
