//! Provider-side ingest.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{BrokerService, KeyService, UploadRecord};
use crate::client::keys::fetch_exchange_keys;
use crate::config::ExchangeConfig;
use crate::record::Record;
use crate::telemetry::{format_duration, Phase, PhaseTimer, PhaseTimes};
use crate::types::ExchangeError;

/// Data-provider orchestrator: prepares record batches (hashing, key
/// retrieval, encryption) and hands the ciphertext tuples to the broker.
/// Inserting the hashes into the broker's bloom filter and persisting the
/// envelopes is the broker's side of the contract.
pub struct DataProvider {
    cfg: ExchangeConfig,
    keyservice: Arc<dyn KeyService>,
    broker: Arc<dyn BrokerService>,
    owner: String,
    hash_key: Option<Vec<u8>>,
    last_times: PhaseTimes,
}

impl DataProvider {
    pub fn new(
        cfg: ExchangeConfig,
        owner: impl Into<String>,
        keyservice: Arc<dyn KeyService>,
        broker: Arc<dyn BrokerService>,
    ) -> Result<Self, ExchangeError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            keyservice,
            broker,
            owner: owner.into(),
            hash_key: None,
            last_times: PhaseTimes::default(),
        })
    }

    /// Phase timings of the most recent ingest.
    pub fn last_times(&self) -> &PhaseTimes {
        &self.last_times
    }

    fn hash_key(&mut self) -> Result<Vec<u8>, ExchangeError> {
        if self.hash_key.is_none() {
            self.hash_key = Some(self.keyservice.fetch_hash_key()?);
        }
        Ok(self.hash_key.clone().unwrap_or_default())
    }

    /// Prepare and upload one batch of records.
    pub fn store_records(&mut self, mut records: Vec<Record>) -> Result<(), ExchangeError> {
        let mut timer = PhaseTimer::start();
        debug!(records = records.len(), "store records");

        let hash_key = self.hash_key()?;
        info!(
            took = %format_duration(timer.mark(Phase::HashKey)),
            "1. retrieved hash key"
        );

        let layout = self.cfg.layout.clone();
        for record in &mut records {
            record.set_hash_key(&hash_key);
            record.set_owner(self.owner.clone());
        }
        let mut ot_indices = Vec::with_capacity(records.len());
        for record in &records {
            ot_indices.push(record.ot_index(&layout, self.cfg.ot_index_len)?);
        }
        info!(
            took = %format_duration(timer.mark(Phase::Hashing)),
            "2. computed hashes and OT indices"
        );

        let keys = fetch_exchange_keys(&self.cfg, &*self.keyservice, &ot_indices)?;
        info!(
            took = %format_duration(timer.mark(Phase::KeyRetrieval)),
            "3. retrieved encryption keys"
        );

        let mut batch = Vec::with_capacity(records.len());
        for (record, key) in records.iter().zip(&keys) {
            let (hash, envelope, owner) = record.upload_format(key, &layout)?;
            batch.push(UploadRecord {
                hash,
                envelope,
                owner,
            });
        }
        info!(
            took = %format_duration(timer.mark(Phase::Encryption)),
            "4. encrypted records"
        );

        self.broker.store_records(&batch)?;
        info!(
            records = batch.len(),
            took = %format_duration(timer.mark(Phase::Upload)),
            "5. uploaded records"
        );

        self.last_times = timer.into_times();
        Ok(())
    }

    /// Read records from a file (one `[a, b, c]` list per line) and store
    /// them.
    pub fn store_from_file(&mut self, path: &Path) -> Result<(), ExchangeError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ExchangeError::Resource(format!("cannot read {path:?}: {e}")))?;
        let layout = self.cfg.layout.clone();
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(Record::new(parse_record_line(line)?, &layout)?);
        }
        info!(records = records.len(), "parsed records from file");
        self.store_records(records)
    }
}

/// Parse one `[a, b, c]` line into a vector of doubles.
pub fn parse_record_line(line: &str) -> Result<Vec<f64>, ExchangeError> {
    let trimmed = line.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| ExchangeError::Config(format!("invalid record element: {part:?}")))
        })
        .collect()
}
