//! External service interfaces: the key authority and the broker.
//!
//! The core only ever acts as an HTTPS JSON *client* towards these two
//! actors; serving is the host's concern. Both interfaces are traits so
//! tests and embedded deployments can supply in-process implementations.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::record::CiphertextEnvelope;
use crate::types::ExchangeError;
use crate::utils::basic_auth_header;

/// OT endpoint negotiated via `GET /key_retrieval?totalOTs=N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtEndpoint {
    pub host: String,
    pub port: u16,
    pub total_ots: usize,
    pub tls: bool,
}

/// PSI endpoint negotiated via `GET /psi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub set_size: usize,
}

/// One record as uploaded to the broker:
/// `(base64(long_hash), envelope, owner)`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub hash: String,
    pub envelope: CiphertextEnvelope,
    pub owner: String,
}

/// Key authority interface.
pub trait KeyService: Send + Sync {
    /// `GET /hash_key`.
    fn fetch_hash_key(&self) -> Result<Vec<u8>, ExchangeError>;

    /// `GET /key_retrieval?totalOTs=N`: ask the authority to open an OT
    /// sender for `total_ots` transfers.
    fn request_key_retrieval(&self, total_ots: usize) -> Result<OtEndpoint, ExchangeError>;
}

/// Broker interface.
pub trait BrokerService: Send + Sync {
    /// `POST /batch_store_records`.
    fn store_records(&self, batch: &[UploadRecord]) -> Result<(), ExchangeError>;

    /// `POST /store_record`: single-record variant of the batch upload.
    fn store_record(&self, record: &UploadRecord) -> Result<(), ExchangeError> {
        self.store_records(std::slice::from_ref(record))
    }

    /// `POST /batch_retrieve_records`: every stored `(hash, envelope)`
    /// pair matching one of the base64 hashes. Multiple ciphertexts per
    /// hash are possible.
    fn batch_retrieve_records(
        &self,
        hashes: &[String],
    ) -> Result<Vec<(String, CiphertextEnvelope)>, ExchangeError>;

    /// `GET /bloom`: the filter as opaque base64.
    fn fetch_bloom(&self) -> Result<String, ExchangeError>;

    /// `GET /psi`: ask the broker to open a PSI sender.
    fn request_psi(&self) -> Result<PsiEndpoint, ExchangeError>;
}

// ---------------------------------------------------------------------------
// HTTPS JSON implementations
// ---------------------------------------------------------------------------

/// Basic-auth credentials: a username and a one-time token. Token
/// acquisition is the host's concern.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

fn map_ureq(e: ureq::Error) -> ExchangeError {
    match e {
        ureq::Error::Status(401, _) => {
            ExchangeError::Auth("credentials rejected (401)".into())
        }
        ureq::Error::Status(code, resp) => ExchangeError::Network(format!(
            "HTTP {code} from {}",
            resp.get_url()
        )),
        ureq::Error::Transport(t) => ExchangeError::Network(t.to_string()),
    }
}

fn build_agent(root_ca: Option<&Path>) -> Result<ureq::Agent, ExchangeError> {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(ca) = root_ca {
        let paths = crate::config::TlsPaths {
            root_ca: Some(ca.to_path_buf()),
            cert: None,
            key: None,
        };
        builder = builder.tls_config(Arc::new(http_tls_config(&paths)?));
    }
    Ok(builder.build())
}

/// rustls client configuration for the HTTPS interfaces (default protocol
/// versions; the wire sessions pin TLS 1.2 separately).
fn http_tls_config(
    paths: &crate::config::TlsPaths,
) -> Result<rustls::ClientConfig, ExchangeError> {
    use std::fs::File;
    use std::io::BufReader;

    let root_ca = paths
        .root_ca
        .as_ref()
        .ok_or_else(|| ExchangeError::Config("no root CA configured".into()))?;
    let file = File::open(root_ca)
        .map_err(|e| ExchangeError::Config(format!("cannot open root CA {root_ca:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert =
            cert.map_err(|e| ExchangeError::Config(format!("invalid root CA: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ExchangeError::Config(format!("invalid root CA: {e}")))?;
    }
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[derive(Deserialize)]
struct HashKeyResponse {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    hash_key: String,
}

#[derive(Deserialize)]
struct KeyRetrievalResponse {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    #[serde(default, rename = "totalOTs")]
    total_ots: usize,
    #[serde(default)]
    tls: bool,
}

#[derive(Deserialize)]
struct BloomResponse {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    bloom: String,
}

#[derive(Deserialize)]
struct PsiResponse {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tls: bool,
    #[serde(default, rename = "setSize")]
    set_size: usize,
}

#[derive(Deserialize)]
struct StoreResponse {
    success: bool,
    #[serde(default)]
    msg: String,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    records: Vec<(String, String)>,
}

/// HTTPS key authority client.
pub struct HttpKeyService {
    agent: ureq::Agent,
    base_url: String,
    creds: Credentials,
}

impl HttpKeyService {
    pub fn new(
        base_url: impl Into<String>,
        creds: Credentials,
        root_ca: Option<&Path>,
    ) -> Result<Self, ExchangeError> {
        Ok(Self {
            agent: build_agent(root_ca)?,
            base_url: base_url.into(),
            creds,
        })
    }

    fn auth(&self) -> String {
        basic_auth_header(&self.creds.user, &self.creds.token)
    }
}

impl KeyService for HttpKeyService {
    fn fetch_hash_key(&self) -> Result<Vec<u8>, ExchangeError> {
        let url = format!("{}/hash_key", self.base_url);
        let resp: HashKeyResponse = self
            .agent
            .get(&url)
            .set("Authorization", &self.auth())
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| ExchangeError::Network(format!("invalid hash key response: {e}")))?;
        if !resp.success {
            return Err(ExchangeError::Network(format!(
                "hash key retrieval failed: {}",
                resp.msg
            )));
        }
        crate::utils::from_base64(&resp.hash_key)
    }

    fn request_key_retrieval(&self, total_ots: usize) -> Result<OtEndpoint, ExchangeError> {
        let url = format!("{}/key_retrieval?totalOTs={total_ots}", self.base_url);
        let resp: KeyRetrievalResponse = self
            .agent
            .get(&url)
            .set("Authorization", &self.auth())
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| ExchangeError::Network(format!("invalid key retrieval response: {e}")))?;
        if !resp.success {
            return Err(ExchangeError::Network(format!(
                "key retrieval failed: {}",
                resp.msg
            )));
        }
        debug!(host = %resp.host, port = resp.port, tls = resp.tls, "OT endpoint negotiated");
        Ok(OtEndpoint {
            host: resp.host,
            port: resp.port,
            total_ots: resp.total_ots,
            tls: resp.tls,
        })
    }
}

/// HTTPS broker client.
pub struct HttpBroker {
    agent: ureq::Agent,
    base_url: String,
    creds: Credentials,
}

impl HttpBroker {
    pub fn new(
        base_url: impl Into<String>,
        creds: Credentials,
        root_ca: Option<&Path>,
    ) -> Result<Self, ExchangeError> {
        Ok(Self {
            agent: build_agent(root_ca)?,
            base_url: base_url.into(),
            creds,
        })
    }

    fn auth(&self) -> String {
        basic_auth_header(&self.creds.user, &self.creds.token)
    }
}

impl HttpBroker {
    fn post_store(&self, url: &str, batch: &[UploadRecord]) -> Result<(), ExchangeError> {
        let mut body = Vec::with_capacity(batch.len());
        for rec in batch {
            body.push(json!([rec.hash, rec.envelope.to_json()?, rec.owner]));
        }
        let resp: StoreResponse = self
            .agent
            .post(url)
            .set("Authorization", &self.auth())
            .send_json(json!(body))
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| ExchangeError::Network(format!("invalid store response: {e}")))?;
        if !resp.success {
            return Err(ExchangeError::Network(format!(
                "failed to store records: {}",
                resp.msg
            )));
        }
        Ok(())
    }
}

impl BrokerService for HttpBroker {
    fn store_records(&self, batch: &[UploadRecord]) -> Result<(), ExchangeError> {
        self.post_store(&format!("{}/batch_store_records", self.base_url), batch)
    }

    fn store_record(&self, record: &UploadRecord) -> Result<(), ExchangeError> {
        self.post_store(
            &format!("{}/store_record", self.base_url),
            std::slice::from_ref(record),
        )
    }

    fn batch_retrieve_records(
        &self,
        hashes: &[String],
    ) -> Result<Vec<(String, CiphertextEnvelope)>, ExchangeError> {
        let url = format!("{}/batch_retrieve_records", self.base_url);
        let resp: RetrieveResponse = self
            .agent
            .post(&url)
            .set("Authorization", &self.auth())
            .send_json(json!({ "hashes": hashes }))
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| ExchangeError::Network(format!("invalid retrieve response: {e}")))?;
        if !resp.success {
            return Err(ExchangeError::Network(format!(
                "failed to retrieve records: {}",
                resp.msg
            )));
        }
        resp.records
            .into_iter()
            .map(|(hash, envelope)| Ok((hash, CiphertextEnvelope::from_json(&envelope)?)))
            .collect()
    }

    fn fetch_bloom(&self) -> Result<String, ExchangeError> {
        let url = format!("{}/bloom", self.base_url);
        let resp: BloomResponse = self
            .agent
            .get(&url)
            .set("Authorization", &self.auth())
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| ExchangeError::Network(format!("invalid bloom response: {e}")))?;
        if !resp.success {
            return Err(ExchangeError::Network(format!(
                "failed to retrieve bloom filter: {}",
                resp.msg
            )));
        }
        Ok(resp.bloom)
    }

    fn request_psi(&self) -> Result<PsiEndpoint, ExchangeError> {
        let url = format!("{}/psi", self.base_url);
        let resp: PsiResponse = self
            .agent
            .get(&url)
            .set("Authorization", &self.auth())
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| ExchangeError::Network(format!("invalid PSI response: {e}")))?;
        if !resp.success {
            return Err(ExchangeError::Network(format!("PSI failed: {}", resp.msg)));
        }
        debug!(host = %resp.host, port = resp.port, tls = resp.tls, "PSI endpoint negotiated");
        Ok(PsiEndpoint {
            host: resp.host,
            port: resp.port,
            tls: resp.tls,
            set_size: resp.set_size,
        })
    }
}
