//! AES-256-GCM record envelope.
//!
//! Plaintext is the little-endian IEEE-754 encoding of the full record.
//! Both the big-endian record length and the long hash are authenticated as
//! associated data, so a ciphertext cannot be replayed under a different
//! hash or truncated to a different arity. The 128-bit exchange key coming
//! out of the OT is expanded to the 32-byte AEAD key with HKDF-SHA256.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::ExchangeError;
use crate::utils::to_base64;

/// AEAD nonce length (bytes).
pub const NONCE_LEN: usize = 12;

/// AEAD tag length (bytes).
pub const TAG_LEN: usize = 16;

/// AES-256 key length (bytes).
const AEAD_KEY_LEN: usize = 32;

/// HKDF info label binding derived keys to this envelope format.
const KEY_INFO: &[u8] = b"record-envelope aes-256-gcm";

/// Encrypted record as exchanged with the broker. All fields travel
/// base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextEnvelope {
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Minimal big-endian byte encoding of the record length.
    #[serde(with = "base64_bytes")]
    pub length: Vec<u8>,
    /// The record's long hash, also part of the associated data.
    #[serde(with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub mac: Vec<u8>,
}

/// Serde adapter for base64-encoded byte fields.
mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::utils::{from_base64, to_base64};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Minimal big-endian byte encoding of a record length.
fn encode_length(n: usize) -> Vec<u8> {
    let bits = usize::BITS - n.leading_zeros();
    let bytes = ((bits + 7) / 8) as usize;
    n.to_be_bytes()[std::mem::size_of::<usize>() - bytes..].to_vec()
}

fn decode_length(bytes: &[u8]) -> Result<usize, ExchangeError> {
    if bytes.len() > std::mem::size_of::<usize>() {
        return Err(ExchangeError::Integrity(
            "length field too wide".into(),
        ));
    }
    let mut n = 0usize;
    for &b in bytes {
        n = (n << 8) | b as usize;
    }
    Ok(n)
}

/// Expand an exchange key into the AEAD key.
fn derive_aead_key(exchange_key: &[u8]) -> Result<[u8; AEAD_KEY_LEN], ExchangeError> {
    let hk = Hkdf::<Sha256>::new(None, exchange_key);
    let mut okm = [0u8; AEAD_KEY_LEN];
    hk.expand(KEY_INFO, &mut okm)
        .map_err(|_| ExchangeError::Config("exchange key unsuitable for key derivation".into()))?;
    Ok(okm)
}

fn le_bytes(values: &[f64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Encrypt a full record under a freshly sampled 96-bit nonce.
pub fn encrypt(
    values: &[f64],
    long_hash: &[u8],
    exchange_key: &[u8],
) -> Result<CiphertextEnvelope, ExchangeError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    encrypt_with_nonce(values, long_hash, exchange_key, &nonce)
}

/// Deterministic-nonce variant. Exposed for test vectors only; production
/// callers go through [`encrypt`].
pub fn encrypt_with_nonce(
    values: &[f64],
    long_hash: &[u8],
    exchange_key: &[u8],
    nonce: &[u8; NONCE_LEN],
) -> Result<CiphertextEnvelope, ExchangeError> {
    let key = derive_aead_key(exchange_key)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| ExchangeError::Config("invalid AEAD key length".into()))?;

    let length = encode_length(values.len());
    let mut aad = length.clone();
    aad.extend_from_slice(long_hash);

    let sealed = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &le_bytes(values),
                aad: &aad,
            },
        )
        .map_err(|_| ExchangeError::Integrity("AEAD seal failed".into()))?;

    // aes-gcm appends the tag; the envelope carries it separately.
    let split = sealed.len() - TAG_LEN;
    Ok(CiphertextEnvelope {
        nonce: nonce.to_vec(),
        length,
        hash: long_hash.to_vec(),
        ciphertext: sealed[..split].to_vec(),
        mac: sealed[split..].to_vec(),
    })
}

/// Decrypt an envelope back into the record vector.
///
/// Fails with an integrity error when the tag does not verify, when the
/// associated data does not match, or when the envelope's hash differs from
/// the hash the caller asked for.
pub fn decrypt(
    envelope: &CiphertextEnvelope,
    exchange_key: &[u8],
    expected_hash: Option<&[u8]>,
) -> Result<Vec<f64>, ExchangeError> {
    if let Some(expected) = expected_hash {
        if envelope.hash != expected {
            return Err(ExchangeError::Integrity(
                "envelope hash does not match the requested record".into(),
            ));
        }
    }
    if envelope.nonce.len() != NONCE_LEN {
        return Err(ExchangeError::Integrity("invalid nonce length".into()));
    }

    let key = derive_aead_key(exchange_key)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| ExchangeError::Config("invalid AEAD key length".into()))?;

    let mut aad = envelope.length.clone();
    aad.extend_from_slice(&envelope.hash);

    let mut sealed = envelope.ciphertext.clone();
    sealed.extend_from_slice(&envelope.mac);

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: &sealed,
                aad: &aad,
            },
        )
        .map_err(|_| ExchangeError::Integrity("AEAD tag mismatch".into()))?;

    let n = decode_length(&envelope.length)?;
    if plaintext.len() != n * 8 {
        return Err(ExchangeError::Integrity(format!(
            "plaintext of {} bytes does not hold {} doubles",
            plaintext.len(),
            n
        )));
    }
    Ok(plaintext
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect())
}

impl CiphertextEnvelope {
    /// JSON body of the envelope as stored by the broker.
    pub fn to_json(&self) -> Result<String, ExchangeError> {
        serde_json::to_string(self)
            .map_err(|e| ExchangeError::Protocol(format!("envelope encoding: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self, ExchangeError> {
        serde_json::from_str(json)
            .map_err(|e| ExchangeError::Protocol(format!("envelope decoding: {e}")))
    }

    /// Base64 of the stored hash field.
    pub fn hash_b64(&self) -> String {
        to_base64(&self.hash)
    }
}
