//! Key authority persistence and validation.

mod common;

use exchange_core::authority::KeyAuthority;
use exchange_core::constants::{ENCKEYS_FILE, HASHKEY_FILE};
use exchange_core::types::ExchangeError;

#[test]
fn generates_and_persists_key_material() {
    let cfg = common::test_config();
    let dir = common::temp_data_dir("authority-gen");

    let authority = KeyAuthority::load_or_generate(&dir, &cfg).unwrap();
    assert_eq!(authority.hash_key().len(), cfg.hashkey_bytes());
    assert_eq!(authority.encryption_keys().len(), cfg.ot_setsize);
    for key in authority.encryption_keys() {
        assert_eq!(key.len(), cfg.enckey_bytes());
    }
    assert!(dir.join(HASHKEY_FILE).exists());
    assert!(dir.join(ENCKEYS_FILE).exists());
    // No stray temp files from the atomic writes.
    assert!(!dir.join("hash_key.tmp").exists());
}

#[test]
fn reload_returns_identical_material_in_stable_order() {
    let cfg = common::test_config();
    let dir = common::temp_data_dir("authority-reload");

    let first = KeyAuthority::load_or_generate(&dir, &cfg).unwrap();
    let second = KeyAuthority::load_or_generate(&dir, &cfg).unwrap();

    assert_eq!(first.hash_key(), second.hash_key());
    assert_eq!(first.encryption_keys(), second.encryption_keys());
}

#[test]
fn key_lookup_by_ot_index() {
    let cfg = common::test_config();
    let dir = common::temp_data_dir("authority-lookup");
    let authority = KeyAuthority::load_or_generate(&dir, &cfg).unwrap();

    assert_eq!(
        authority.key_at(0),
        Some(&authority.encryption_keys()[0][..])
    );
    assert_eq!(
        authority.key_at((cfg.ot_setsize - 1) as u64),
        Some(&authority.encryption_keys()[cfg.ot_setsize - 1][..])
    );
    assert_eq!(authority.key_at(cfg.ot_setsize as u64), None);
}

#[test]
fn inconsistent_key_file_is_a_config_error() {
    let cfg = common::test_config();
    let dir = common::temp_data_dir("authority-mismatch");
    KeyAuthority::load_or_generate(&dir, &cfg).unwrap();

    // Reloading under a different table size must fail, not regenerate:
    // rotation would invalidate every stored ciphertext.
    let mut bigger = cfg.clone();
    bigger.ot_index_len = 9;
    bigger.ot_setsize = 1 << 9;
    let result = KeyAuthority::load_or_generate(&dir, &bigger);
    assert!(matches!(result, Err(ExchangeError::Config(_))));
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut cfg = common::test_config();
    cfg.ot_setsize = 12; // not 2^ot_index_len
    let dir = common::temp_data_dir("authority-badcfg");
    assert!(matches!(
        KeyAuthority::load_or_generate(&dir, &cfg),
        Err(ExchangeError::Config(_))
    ));
}
