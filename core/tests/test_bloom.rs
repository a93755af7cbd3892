//! Bloom filter container behaviour.

mod common;

use exchange_core::bloom::RecordFilter;

#[test]
fn insert_then_probe() {
    let mut filter = RecordFilter::new(1000, 1e-6).unwrap();
    filter.insert("aGFzaC0x");
    filter.insert("aGFzaC0y");
    assert!(filter.contains("aGFzaC0x"));
    assert!(filter.contains("aGFzaC0y"));
    assert!(!filter.contains("aGFzaC0z"));
}

#[test]
fn base64_round_trip_preserves_membership() {
    let mut filter = RecordFilter::new(1000, 1e-6).unwrap();
    let members: Vec<String> = (0..100).map(|i| format!("hash-{i}")).collect();
    for m in &members {
        filter.insert(m);
    }

    let exported = filter.to_base64().unwrap();
    let loaded = RecordFilter::load_from_base64(&exported).unwrap();

    // No false negatives after the round trip.
    for m in &members {
        assert!(loaded.contains(m));
    }
    // Sizing parameters survive.
    assert_eq!(loaded.capacity(), 1000);
    assert_eq!(loaded.error_rate(), 1e-6);

    // Non-members stay out (up to the configured false-positive rate; at
    // 1e-6 over 100 probes a hit would indicate broken sip keys).
    let misses = (0..100)
        .filter(|i| loaded.contains(&format!("other-{i}")))
        .count();
    assert_eq!(misses, 0);
}

#[test]
fn file_round_trip_preserves_membership() {
    let mut filter = RecordFilter::new(100, 1e-6).unwrap();
    filter.insert("stored-record");
    let dir = common::temp_data_dir("bloom-file");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bloom.filter");

    filter.save(&path).unwrap();
    let loaded = RecordFilter::open(&path).unwrap();
    assert!(loaded.contains("stored-record"));
    assert!(!loaded.contains("absent-record"));
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn invalid_parameters_are_rejected() {
    assert!(RecordFilter::new(0, 0.01).is_err());
    assert!(RecordFilter::new(1000, 0.0).is_err());
    assert!(RecordFilter::new(1000, 1.5).is_err());
}

#[test]
fn malformed_import_is_rejected() {
    assert!(RecordFilter::load_from_base64("not base64 !!!").is_err());
    assert!(RecordFilter::load_from_base64("AAAA").is_err());
}
