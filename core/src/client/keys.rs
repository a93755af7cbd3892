//! Encryption-key retrieval over OT.
//!
//! Keys are fetched per *distinct* OT index; the index list may contain
//! duplicates and the result preserves the caller's order, so 20-bit index
//! collisions reuse one key. Requests larger than one session allows are
//! chunked; with parallelism enabled the chunks run as concurrent sessions
//! on distinct ports, bounded by the configured worker count, and the
//! results are reassembled in chunk order.

use std::collections::{BTreeMap, HashMap};

use crossbeam::channel;
use tracing::{debug, info};

use crate::api::KeyService;
use crate::config::ExchangeConfig;
use crate::ot::{OtParams, OtReceiverSession};
use crate::types::ExchangeError;
use crate::utils::keys_from_ints;

/// Run one OT session for the given chunk of distinct indices.
fn retrieve_chunk(
    cfg: &ExchangeConfig,
    keyservice: &dyn KeyService,
    indices: &[u64],
) -> Result<Vec<u128>, ExchangeError> {
    let endpoint = keyservice.request_key_retrieval(indices.len())?;
    if endpoint.tls != cfg.ot_tls {
        return Err(ExchangeError::Protocol(format!(
            "mismatch of server and client TLS settings: client {}, server {}",
            cfg.ot_tls, endpoint.tls
        )));
    }
    info!(
        host = %endpoint.host,
        port = endpoint.port,
        tls = endpoint.tls,
        transfers = indices.len(),
        "connecting for OT"
    );
    let params = OtParams::from_config(cfg, indices.len());
    let tls = cfg.ot_tls.then_some(&cfg.tls);
    let session = OtReceiverSession::connect(&endpoint.host, endpoint.port, tls, params)?;
    session.execute(indices)
}

/// Retrieve the encryption keys for `all_indices` (duplicates allowed)
/// from the key authority. Returns one key per input index, in input
/// order.
pub fn fetch_exchange_keys(
    cfg: &ExchangeConfig,
    keyservice: &dyn KeyService,
    all_indices: &[u64],
) -> Result<Vec<Vec<u8>>, ExchangeError> {
    if all_indices.is_empty() {
        return Ok(Vec::new());
    }

    // Order-preserving dedup; the mapping resolves duplicates afterwards.
    let mut mapping: HashMap<u64, usize> = HashMap::new();
    let mut indices: Vec<u64> = Vec::new();
    for &index in all_indices {
        if !mapping.contains_key(&index) {
            mapping.insert(index, indices.len());
            indices.push(index);
        }
    }

    let mut step = cfg.ot_max_num;
    let mut values: Vec<u128> = Vec::with_capacity(indices.len());

    if cfg.parallel && indices.len() > step {
        let chunks = (indices.len() + step - 1) / step;
        if chunks > cfg.max_procs {
            // Would spawn too many sessions; widen the chunks instead.
            step = (indices.len() + cfg.max_procs - 1) / cfg.max_procs;
        }
        let chunk_list: Vec<&[u64]> = indices.chunks(step).collect();
        debug!(sessions = chunk_list.len(), step, "parallel OT key retrieval");

        let (tx, rx) = channel::unbounded();
        std::thread::scope(|scope| {
            for (chunk_idx, chunk) in chunk_list.iter().copied().enumerate() {
                let tx = tx.clone();
                scope.spawn(move || {
                    let result = retrieve_chunk(cfg, keyservice, chunk);
                    let _ = tx.send((chunk_idx, result));
                });
            }
        });
        drop(tx);

        // Reassemble in chunk order; the first failure aborts the whole
        // retrieval.
        let mut results: BTreeMap<usize, Vec<u128>> = BTreeMap::new();
        for (chunk_idx, result) in rx {
            results.insert(chunk_idx, result?);
        }
        for (_, chunk_values) in results {
            values.extend(chunk_values);
        }
    } else {
        for chunk in indices.chunks(step) {
            values.extend(retrieve_chunk(cfg, keyservice, chunk)?);
        }
    }

    let converted = keys_from_ints(&values, cfg.enckey_bytes());

    // Map back to the original index list, duplicates included.
    let mut result = Vec::with_capacity(all_indices.len());
    for index in all_indices {
        let at = mapping[index];
        result.push(converted[at].clone());
    }
    Ok(result)
}
