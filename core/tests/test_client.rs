//! End-to-end retrieval and ingest against the in-process harness, with
//! real OT and PSI sessions on loopback sockets.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{TestBroker, TestKeyService};
use exchange_core::client::keys::fetch_exchange_keys;
use exchange_core::client::{DataProvider, RetrievalClient};
use exchange_core::config::ExchangeConfig;
use exchange_core::record::Record;
use exchange_core::similarity::OffsetPolicy;
use exchange_core::types::ExchangeError;

fn make_records(cfg: &ExchangeConfig, values: &[[f64; 5]]) -> Vec<Record> {
    values
        .iter()
        .map(|v| Record::new(v.to_vec(), &cfg.layout).expect("record"))
        .collect()
}

/// Population used by the matching scenarios: three records inside the
/// query envelope at absolute offset 0.1, four outside.
const MATCHING: [[f64; 5]; 3] = [
    [2.0, 2.0, 1.0, 1.0, 1.0],
    [1.95, 2.05, 2.0, 2.0, 2.0],
    [2.1, 1.9, 3.0, 3.0, 3.0],
];
const NON_MATCHING: [[f64; 5]; 4] = [
    [3.0, 2.0, 4.0, 4.0, 4.0],
    [2.0, 3.0, 5.0, 5.0, 5.0],
    [50.0, 60.0, 6.0, 6.0, 6.0],
    [0.5, 0.5, 7.0, 7.0, 7.0],
];
const QUERY: [f64; 5] = [2.0, 2.0, 9.9, 8.8, 7.7];

struct Harness {
    cfg: ExchangeConfig,
    keyservice: Arc<TestKeyService>,
    broker: Arc<TestBroker>,
}

impl Harness {
    fn new(label: &str) -> Self {
        common::init_tracing();
        let cfg = common::test_config();
        Self {
            keyservice: Arc::new(TestKeyService::new(&cfg, label)),
            broker: Arc::new(TestBroker::new(&cfg)),
            cfg,
        }
    }

    fn ingest(&self, records: Vec<Record>) {
        let mut provider = DataProvider::new(
            self.cfg.clone(),
            "provider-1",
            self.keyservice.clone(),
            self.broker.clone(),
        )
        .expect("provider");
        provider.store_records(records).expect("ingest");
    }

    fn client(&self) -> RetrievalClient {
        RetrievalClient::new(
            self.cfg.clone(),
            self.keyservice.clone(),
            self.broker.clone(),
        )
        .expect("client")
    }
}

fn sorted_values(records: &[Record]) -> Vec<Vec<f64>> {
    let mut values: Vec<Vec<f64>> = records.iter().map(|r| r.values().to_vec()).collect();
    values.sort_by(|a, b| a.partial_cmp(b).expect("ordered"));
    values
}

#[test]
fn identity_round_trip() {
    let h = Harness::new("identity");
    let record = [1.0, 22.0, 3.0, 4.0, 5.0];
    h.ingest(make_records(&h.cfg, &[record]));

    let mut client = h.client();
    client.set_metric_by_name("offset-0").unwrap();

    // A zero envelope holds exactly the query cell.
    assert_eq!(client.compute_candidates(&record).unwrap().len(), 1);

    let result = client.full_retrieve(&record).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].values(), &record);
}

#[test]
fn bloom_end_to_end_returns_exactly_the_matching_records() {
    let h = Harness::new("bloom-e2e");
    let mut population = MATCHING.to_vec();
    population.extend_from_slice(&NON_MATCHING);
    h.ingest(make_records(&h.cfg, &population));
    assert_eq!(h.broker.stored_count(), 7);

    let mut client = h.client();
    client.set_metric(OffsetPolicy::Absolute(0.1));
    let result = client.full_retrieve(&QUERY).unwrap();

    assert_eq!(sorted_values(&result), sorted_values(&make_records(&h.cfg, &MATCHING)));
}

#[test]
fn parallel_and_sequential_bloom_matching_agree() {
    let h = Harness::new("bloom-parallel");
    let mut population = MATCHING.to_vec();
    population.extend_from_slice(&NON_MATCHING);
    h.ingest(make_records(&h.cfg, &population));

    let mut parallel_client = h.client();
    parallel_client.set_metric(OffsetPolicy::Absolute(0.1));
    let parallel = parallel_client.full_retrieve(&QUERY).unwrap();

    let mut seq_cfg = h.cfg.clone();
    seq_cfg.parallel = false;
    let mut seq_client = RetrievalClient::new(
        seq_cfg,
        h.keyservice.clone(),
        h.broker.clone(),
    )
    .unwrap();
    seq_client.set_metric(OffsetPolicy::Absolute(0.1));
    let sequential = seq_client.full_retrieve(&QUERY).unwrap();

    assert_eq!(sorted_values(&parallel), sorted_values(&sequential));
}

#[test]
fn psi_end_to_end_returns_exactly_the_matching_records() {
    let h = Harness::new("psi-e2e");
    let mut population = MATCHING.to_vec();
    population.extend_from_slice(&NON_MATCHING);
    h.ingest(make_records(&h.cfg, &population));

    let mut client = h.client();
    client.enable_psi_mode();
    client.set_metric(OffsetPolicy::Absolute(0.1));
    let result = client.full_retrieve(&QUERY).unwrap();

    assert_eq!(sorted_values(&result), sorted_values(&make_records(&h.cfg, &MATCHING)));
    assert_eq!(h.broker.psi_requests.load(Ordering::SeqCst), 1);
}

#[test]
fn psi_capacity_is_checked_before_any_network_io() {
    let h = Harness::new("psi-capacity");
    h.ingest(make_records(&h.cfg, &MATCHING));

    let mut client = h.client();
    client.enable_psi_mode();
    // 25 cells per dimension: 625 candidates, above the 450 set size.
    client.set_metric(OffsetPolicy::Absolute(0.12));
    let result = client.full_retrieve(&QUERY);

    assert!(matches!(
        result,
        Err(ExchangeError::CapacityExceeded { actual: 625, limit: 450 })
    ));
    assert_eq!(h.broker.psi_requests.load(Ordering::SeqCst), 0);
}

#[test]
fn hash_key_is_memoised_per_session() {
    let h = Harness::new("hash-key-memo");
    let mut client = h.client();

    let first = client.hash_key().unwrap().to_vec();
    let second = client.hash_key().unwrap().to_vec();
    assert_eq!(first, second);
    assert_eq!(h.keyservice.hash_key_fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn chunked_key_retrieval_matches_a_single_session() {
    let h = Harness::new("ot-chunking");
    let indices: Vec<u64> = (0..10).collect();

    // One transfer per session: ten parallel sessions.
    let mut chunked_cfg = h.cfg.clone();
    chunked_cfg.ot_max_num = 1;
    chunked_cfg.parallel = true;
    chunked_cfg.max_procs = 16;
    let chunked = fetch_exchange_keys(&chunked_cfg, &*h.keyservice, &indices).unwrap();

    // All ten transfers in one session.
    let mut single_cfg = h.cfg.clone();
    single_cfg.ot_max_num = 10;
    let single = fetch_exchange_keys(&single_cfg, &*h.keyservice, &indices).unwrap();

    assert_eq!(chunked, single);

    // Both agree with the authority's table, in input order.
    let table = h.keyservice.authority.encryption_keys();
    for (k, &index) in indices.iter().enumerate() {
        assert_eq!(chunked[k], table[index as usize]);
    }
}

#[test]
fn duplicate_ot_indices_share_one_key() {
    let h = Harness::new("ot-dedup");
    let keys = fetch_exchange_keys(&h.cfg, &*h.keyservice, &[5, 5, 3, 5]).unwrap();
    assert_eq!(keys.len(), 4);
    assert_eq!(keys[0], keys[1]);
    assert_eq!(keys[0], keys[3]);
    assert_ne!(keys[0], keys[2]);

    let table = h.keyservice.authority.encryption_keys();
    assert_eq!(keys[0], table[5]);
    assert_eq!(keys[2], table[3]);
}

#[test]
fn empty_match_set_returns_empty_result() {
    let h = Harness::new("empty");
    h.ingest(make_records(&h.cfg, &NON_MATCHING));

    let mut client = h.client();
    client.set_metric(OffsetPolicy::Absolute(0.1));
    let result = client.full_retrieve(&QUERY).unwrap();
    assert!(result.is_empty());
}

#[test]
fn payload_suffix_does_not_affect_matching() {
    let h = Harness::new("suffix");
    // Same identifier cell, three different payloads: all three match and
    // all three decrypt to their own payloads.
    let population = [
        [2.0, 2.0, 1.0, 1.0, 1.0],
        [2.0, 2.0, 2.0, 2.0, 2.0],
        [2.0, 2.0, 3.0, 3.0, 3.0],
    ];
    h.ingest(make_records(&h.cfg, &population));

    let mut client = h.client();
    client.set_metric_by_name("offset-0").unwrap();
    let result = client.full_retrieve(&[2.0, 2.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(sorted_values(&result), sorted_values(&make_records(&h.cfg, &population)));
}
