//! Full retrieval orchestration.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam::channel;
use tracing::{debug, info, warn};

use crate::api::{BrokerService, KeyService};
use crate::bloom::RecordFilter;
use crate::client::keys::fetch_exchange_keys;
use crate::config::ExchangeConfig;
use crate::psi::{self, PsiParams, PsiReceiverSession};
use crate::record::{envelope, hash_to_index, Record};
use crate::similarity::{OffsetIterator, OffsetPolicy};
use crate::telemetry::{format_duration, Phase, PhaseTimer, PhaseTimes};
use crate::types::ExchangeError;
use crate::utils::from_base64;

/// Client-side orchestrator for one or more retrievals.
///
/// Holds the memoised hash key for the session; the key retrieved once is
/// used consistently for the remainder of every retrieval.
pub struct RetrievalClient {
    cfg: ExchangeConfig,
    keyservice: Arc<dyn KeyService>,
    broker: Arc<dyn BrokerService>,
    metric: OffsetPolicy,
    psi_mode: bool,
    hash_key: Option<Vec<u8>>,
    last_times: PhaseTimes,
}

impl RetrievalClient {
    pub fn new(
        cfg: ExchangeConfig,
        keyservice: Arc<dyn KeyService>,
        broker: Arc<dyn BrokerService>,
    ) -> Result<Self, ExchangeError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            keyservice,
            broker,
            metric: OffsetPolicy::Absolute(1.0),
            psi_mode: false,
            hash_key: None,
            last_times: PhaseTimes::default(),
        })
    }

    /// Switch matching to PSI instead of the bloom filter.
    pub fn enable_psi_mode(&mut self) {
        self.psi_mode = true;
    }

    pub fn set_metric(&mut self, metric: OffsetPolicy) {
        self.metric = metric;
    }

    pub fn set_metric_by_name(&mut self, name: &str) -> Result<(), ExchangeError> {
        self.metric = OffsetPolicy::parse(name)?;
        Ok(())
    }

    /// Phase timings of the most recent retrieval.
    pub fn last_times(&self) -> &PhaseTimes {
        &self.last_times
    }

    /// The session hash key, fetched once and memoised: a second call
    /// returns the cached value without network I/O.
    pub fn hash_key(&mut self) -> Result<&[u8], ExchangeError> {
        if self.hash_key.is_none() {
            let key = self.keyservice.fetch_hash_key()?;
            debug!(key = %hex::encode(&key), "retrieved hash key");
            self.hash_key = Some(key);
        }
        Ok(self.hash_key.as_deref().unwrap_or_default())
    }

    /// Build the candidate enumerator for a query under the configured
    /// metric.
    pub fn compute_candidates(&self, target: &[f64]) -> Result<OffsetIterator, ExchangeError> {
        OffsetIterator::new(target, &self.metric, &self.cfg.layout)
    }

    /// Perform a full retrieval: candidates, hash key, matching, key
    /// retrieval, ciphertext fetch, decryption. Returns the decrypted
    /// records; a single undecryptable ciphertext is dropped, any other
    /// failure aborts with exactly one error.
    pub fn full_retrieve(&mut self, target: &[f64]) -> Result<Vec<Record>, ExchangeError> {
        let mut timer = PhaseTimer::start();
        debug!(query = ?target, "retrieve matches");

        let candidates = self.compute_candidates(target)?;
        let num_candidates = candidates.len();
        info!(
            candidates = num_candidates,
            took = %format_duration(timer.mark(Phase::Candidates)),
            "1. computed candidates"
        );

        self.hash_key()?;
        let hash_key = self.hash_key.clone().unwrap_or_default();
        info!(
            took = %format_duration(timer.mark(Phase::HashKey)),
            "2. retrieved hash secret"
        );

        let matches = if self.psi_mode {
            self.compute_matches_psi(candidates, &hash_key)?
        } else {
            self.compute_matches_bloom(candidates, &hash_key)?
        };
        info!(
            matches = matches.len(),
            took = %format_duration(timer.mark(Phase::Matching)),
            "3. computed matches"
        );

        let result = self.batch_get_records(&matches, &mut timer)?;
        info!(records = result.len(), "4. retrieved records");

        self.last_times = timer.into_times();
        Ok(result)
    }

    /// Bloom-filter matching: download the filter once, then probe every
    /// candidate, in parallel over a split enumerator when enabled.
    fn compute_matches_bloom(
        &self,
        candidates: OffsetIterator,
        hash_key: &[u8],
    ) -> Result<Vec<Record>, ExchangeError> {
        let filter = RecordFilter::load_from_base64(&self.broker.fetch_bloom()?)?;
        debug!("retrieved bloom filter");

        let layout = &self.cfg.layout;
        if !self.cfg.parallel {
            let mut matches = Vec::new();
            for vec in candidates {
                let record = Record::with_hash_key(vec, hash_key, layout)?;
                if filter.contains(&record.long_hash_b64(layout)?) {
                    matches.push(record);
                }
            }
            return Ok(matches);
        }

        let parts = candidates.split(num_cpus::get(), 0)?;
        debug!(workers = parts.len(), "parallel bloom matching");
        let (tx, rx) = channel::unbounded();
        std::thread::scope(|scope| {
            for (part_idx, part) in parts.into_iter().enumerate() {
                let tx = tx.clone();
                let filter = &filter;
                scope.spawn(move || {
                    let run = || -> Result<Vec<Record>, ExchangeError> {
                        let mut found = Vec::new();
                        for vec in part {
                            let record = Record::with_hash_key(vec, hash_key, layout)?;
                            if filter.contains(&record.long_hash_b64(layout)?) {
                                found.push(record);
                            }
                        }
                        Ok(found)
                    };
                    let _ = tx.send((part_idx, run()));
                });
            }
        });
        drop(tx);

        let mut by_part = std::collections::BTreeMap::new();
        for (part_idx, result) in rx {
            by_part.insert(part_idx, result?);
        }
        let mut matches = Vec::new();
        for (_, found) in by_part {
            matches.extend(found);
        }
        Ok(matches)
    }

    /// PSI matching: materialise the candidate set to its deduplicated
    /// PSI indices and intersect them with the broker's set.
    fn compute_matches_psi(
        &self,
        candidates: OffsetIterator,
        hash_key: &[u8],
    ) -> Result<Vec<Record>, ExchangeError> {
        let num_candidates = candidates.len();
        if num_candidates > self.cfg.psi_setsize {
            return Err(ExchangeError::CapacityExceeded {
                actual: num_candidates,
                limit: self.cfg.psi_setsize,
            });
        }

        let layout = &self.cfg.layout;
        let mut records = Vec::with_capacity(num_candidates);
        let mut indices = Vec::with_capacity(num_candidates);
        let mut seen = HashSet::new();
        let mut psi_set = Vec::new();
        for vec in candidates {
            let record = Record::with_hash_key(vec, hash_key, layout)?;
            let index = record.psi_index(layout, self.cfg.psi_index_len)?;
            if seen.insert(index) {
                psi_set.push(index);
            }
            records.push(record);
            indices.push(index);
        }
        if psi_set.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = self.broker.request_psi()?;
        if endpoint.tls != self.cfg.psi_tls {
            return Err(ExchangeError::Protocol(format!(
                "mismatch of server and client TLS settings: client {}, server {}",
                self.cfg.psi_tls, endpoint.tls
            )));
        }
        if psi_set.len() > endpoint.set_size {
            return Err(ExchangeError::CapacityExceeded {
                actual: psi_set.len(),
                limit: endpoint.set_size,
            });
        }
        info!(
            host = %endpoint.host,
            port = endpoint.port,
            tls = endpoint.tls,
            set_size = endpoint.set_size,
            "connecting for PSI"
        );

        let padded =
            psi::prepare_client_set(&psi_set, endpoint.set_size, self.cfg.psi_index_len)?;
        let params = PsiParams {
            set_size: endpoint.set_size,
            scheme: self.cfg.psi_scheme,
            index_len: self.cfg.psi_index_len,
        };
        let tls = self.cfg.psi_tls.then_some(&self.cfg.tls);
        let session = PsiReceiverSession::connect(&endpoint.host, endpoint.port, tls, params)?;
        let matched_positions = session.execute(&padded)?;

        // Drop padding dummies, then keep the candidates whose PSI index
        // is in the intersection.
        let dummy_base = psi::client_dummy_base(self.cfg.psi_index_len, endpoint.set_size);
        let matched: HashSet<u128> = matched_positions
            .into_iter()
            .map(|at| padded[at])
            .filter(|&v| v < dummy_base)
            .collect();
        debug!(matches = matched.len(), "PSI intersection");

        Ok(records
            .into_iter()
            .zip(indices)
            .filter(|(_, index)| matched.contains(index))
            .map(|(record, _)| record)
            .collect())
    }

    /// Retrieve and decrypt the ciphertexts for the matched candidates.
    fn batch_get_records(
        &mut self,
        matches: &[Record],
        timer: &mut PhaseTimer,
    ) -> Result<Vec<Record>, ExchangeError> {
        let layout = self.cfg.layout.clone();
        let ot_index_len = self.cfg.ot_index_len;

        // One OT per distinct index; collisions share a key.
        let mut ot_indices: Vec<u64> = Vec::new();
        let mut seen = HashSet::new();
        for record in matches {
            let index = record.ot_index(&layout, ot_index_len)?;
            if seen.insert(index) {
                ot_indices.push(index);
            }
        }
        let keys = fetch_exchange_keys(&self.cfg, &*self.keyservice, &ot_indices)?;
        let key_map: std::collections::HashMap<u64, Vec<u8>> =
            ot_indices.into_iter().zip(keys).collect();
        info!(
            keys = key_map.len(),
            took = %format_duration(timer.mark(Phase::KeyRetrieval)),
            "4.1 retrieved encryption keys"
        );

        let mut hash_list = Vec::with_capacity(matches.len());
        for record in matches {
            hash_list.push(record.long_hash_b64(&layout)?);
        }
        if hash_list.is_empty() {
            timer.mark(Phase::RecordFetch);
            timer.mark(Phase::Decryption);
            return Ok(Vec::new());
        }
        let ciphertexts = self.broker.batch_retrieve_records(&hash_list)?;
        info!(
            ciphertexts = ciphertexts.len(),
            took = %format_duration(timer.mark(Phase::RecordFetch)),
            "4.2 retrieved encrypted records"
        );

        let mut result = Vec::with_capacity(ciphertexts.len());
        for (hash_b64, ciphertext) in ciphertexts {
            let hash = from_base64(&hash_b64)?;
            let index = hash_to_index(&hash, ot_index_len) as u64;
            let Some(key) = key_map.get(&index) else {
                warn!(hash = %hash_b64, "no key retrieved for returned record, dropping");
                continue;
            };
            match envelope::decrypt(&ciphertext, key, Some(&hash)) {
                Ok(values) => match Record::new(values, &layout) {
                    Ok(record) => result.push(record),
                    Err(e) => warn!(hash = %hash_b64, error = %e, "malformed plaintext, dropping"),
                },
                Err(e @ ExchangeError::Integrity(_)) => {
                    warn!(hash = %hash_b64, error = %e, "integrity failure, dropping record");
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            decrypted = result.len(),
            took = %format_duration(timer.mark(Phase::Decryption)),
            "4.3 decrypted records"
        );
        Ok(result)
    }
}
