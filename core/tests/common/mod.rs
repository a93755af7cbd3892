//! Shared test harness: a key authority and a broker running in-process,
//! with real OT/PSI sessions served on loopback sockets.

#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use exchange_core::api::{BrokerService, KeyService, OtEndpoint, PsiEndpoint, UploadRecord};
use exchange_core::authority::KeyAuthority;
use exchange_core::bloom::RecordFilter;
use exchange_core::config::{ExchangeConfig, RecordLayout};
use exchange_core::psi::{PsiParams, PsiSenderSession};
use exchange_core::record::{hash_to_index, CiphertextEnvelope};
use exchange_core::types::ExchangeError;
use exchange_core::utils::from_base64;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

/// Configuration scaled down for fast loopback tests: 2^8 encryption keys
/// and a 5-element record with a 2-element identifier.
pub fn test_config() -> ExchangeConfig {
    ExchangeConfig {
        ot_index_len: 8,
        ot_setsize: 1 << 8,
        psi_setsize: 450,
        bloom_capacity: 1000,
        bloom_error_rate: 1e-6,
        layout: RecordLayout::new(5, 2, vec![3, 3]),
        ..ExchangeConfig::default()
    }
}

static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fresh scratch directory for key material.
pub fn temp_data_dir(label: &str) -> PathBuf {
    let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "exchange-core-{label}-{}-{n}",
        std::process::id()
    ))
}

/// Key authority double: real key material, real OT sessions on loopback
/// ports, counted hash-key fetches.
pub struct TestKeyService {
    pub cfg: ExchangeConfig,
    pub authority: Arc<KeyAuthority>,
    pub hash_key_fetches: AtomicUsize,
}

impl TestKeyService {
    pub fn new(cfg: &ExchangeConfig, label: &str) -> Self {
        let authority = KeyAuthority::load_or_generate(&temp_data_dir(label), cfg)
            .expect("key authority init");
        Self {
            cfg: cfg.clone(),
            authority: Arc::new(authority),
            hash_key_fetches: AtomicUsize::new(0),
        }
    }
}

impl KeyService for TestKeyService {
    fn fetch_hash_key(&self) -> Result<Vec<u8>, ExchangeError> {
        self.hash_key_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.authority.hash_key().to_vec())
    }

    fn request_key_retrieval(&self, total_ots: usize) -> Result<OtEndpoint, ExchangeError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let port = listener.local_addr()?.port();
        let authority = Arc::clone(&self.authority);
        let cfg = self.cfg.clone();
        thread::spawn(move || {
            if let Err(e) = authority.serve_key_retrieval(&listener, &cfg, total_ots) {
                eprintln!("OT sender session failed: {e}");
            }
        });
        Ok(OtEndpoint {
            host: "127.0.0.1".into(),
            port,
            total_ots,
            tls: self.cfg.ot_tls,
        })
    }
}

/// Broker double: in-memory ciphertext store, a real bloom filter, real
/// PSI sender sessions on loopback ports.
pub struct TestBroker {
    pub cfg: ExchangeConfig,
    records: Mutex<Vec<(String, CiphertextEnvelope, String)>>,
    filter: Mutex<RecordFilter>,
    pub psi_requests: AtomicUsize,
}

impl TestBroker {
    pub fn new(cfg: &ExchangeConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            records: Mutex::new(Vec::new()),
            filter: Mutex::new(
                RecordFilter::new(cfg.bloom_capacity, cfg.bloom_error_rate)
                    .expect("bloom filter init"),
            ),
            psi_requests: AtomicUsize::new(0),
        }
    }

    pub fn stored_count(&self) -> usize {
        self.records.lock().expect("broker lock").len()
    }

    fn stored_psi_indices(&self) -> Result<Vec<u128>, ExchangeError> {
        let records = self.records.lock().expect("broker lock");
        records
            .iter()
            .map(|(hash_b64, _, _)| {
                Ok(hash_to_index(&from_base64(hash_b64)?, self.cfg.psi_index_len))
            })
            .collect()
    }
}

impl BrokerService for TestBroker {
    fn store_records(&self, batch: &[UploadRecord]) -> Result<(), ExchangeError> {
        let mut records = self.records.lock().expect("broker lock");
        let mut filter = self.filter.lock().expect("broker lock");
        for rec in batch {
            filter.insert(&rec.hash);
            records.push((rec.hash.clone(), rec.envelope.clone(), rec.owner.clone()));
        }
        Ok(())
    }

    fn batch_retrieve_records(
        &self,
        hashes: &[String],
    ) -> Result<Vec<(String, CiphertextEnvelope)>, ExchangeError> {
        let records = self.records.lock().expect("broker lock");
        Ok(records
            .iter()
            .filter(|(hash, _, _)| hashes.contains(hash))
            .map(|(hash, envelope, _)| (hash.clone(), envelope.clone()))
            .collect())
    }

    fn fetch_bloom(&self) -> Result<String, ExchangeError> {
        self.filter.lock().expect("broker lock").to_base64()
    }

    fn request_psi(&self) -> Result<PsiEndpoint, ExchangeError> {
        self.psi_requests.fetch_add(1, Ordering::SeqCst);
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let port = listener.local_addr()?.port();
        let params = PsiParams {
            set_size: self.cfg.psi_setsize,
            scheme: self.cfg.psi_scheme,
            index_len: self.cfg.psi_index_len,
        };
        let server_set = self.stored_psi_indices()?;
        thread::spawn(move || {
            let session = match PsiSenderSession::accept(&listener, None, params) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("PSI accept failed: {e}");
                    return;
                }
            };
            if let Err(e) = session.execute(&server_set) {
                eprintln!("PSI sender session failed: {e}");
            }
        });
        Ok(PsiEndpoint {
            host: "127.0.0.1".into(),
            port,
            tls: self.cfg.psi_tls,
            set_size: self.cfg.psi_setsize,
        })
    }
}
