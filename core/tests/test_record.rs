//! Record codec: canonical encoding, keyed hashing, index derivation, and
//! the AEAD envelope.

use exchange_core::config::RecordLayout;
use exchange_core::record::{
    canonical_id, envelope, hash_to_index, round_record, Record,
};
use proptest::prelude::*;

fn layout() -> RecordLayout {
    RecordLayout::new(5, 2, vec![3, 3])
}

const KEY: [u8; 16] = [0x01; 16];

#[test]
fn canonical_encoding_is_python_style() {
    assert_eq!(canonical_id(&[1.1, 22.2, 333.0]), "[1.1, 22.2, 333.0]");
    assert_eq!(canonical_id(&[1.0]), "[1.0]");
    assert_eq!(canonical_id(&[]), "[]");
    assert_eq!(canonical_id(&[-0.5, 2.0]), "[-0.5, 2.0]");
}

#[test]
fn rounded_identifier_uses_prefix_only() {
    let layout = RecordLayout::new(4, 3, vec![3, 3, 3]);
    let rounded = round_record(&[11.1, 222.2, 3333.33, 77.7], &layout);
    assert_eq!(rounded, vec![11.1, 222.0, 3330.0]);
}

#[test]
fn long_hash_depends_only_on_rounded_identifier_and_key() {
    let layout = layout();
    let a = Record::with_hash_key(vec![1.0, 22.0, 3.0, 4.0, 5.0], &KEY, &layout).unwrap();
    // Same quantisation cell, different payload suffix.
    let b = Record::with_hash_key(vec![1.001, 22.01, 9.0, 9.0, 9.0], &KEY, &layout).unwrap();
    assert_eq!(
        a.long_hash(&layout).unwrap(),
        b.long_hash(&layout).unwrap()
    );

    // A different key changes the hash.
    let c = Record::with_hash_key(vec![1.0, 22.0, 3.0, 4.0, 5.0], &[0x02; 16], &layout).unwrap();
    assert_ne!(
        a.long_hash(&layout).unwrap(),
        c.long_hash(&layout).unwrap()
    );

    // A different quantisation cell changes the hash.
    let d = Record::with_hash_key(vec![1.5, 22.0, 3.0, 4.0, 5.0], &KEY, &layout).unwrap();
    assert_ne!(
        a.long_hash(&layout).unwrap(),
        d.long_hash(&layout).unwrap()
    );
}

#[test]
fn hash_requires_a_key() {
    let layout = layout();
    let r = Record::new(vec![1.0, 2.0, 3.0, 4.0, 5.0], &layout).unwrap();
    assert!(r.long_hash(&layout).is_err());
}

#[test]
fn record_arity_is_validated() {
    let layout = layout();
    assert!(Record::new(vec![1.0, 2.0], &layout).is_err());
    assert!(Record::new(vec![1.0, 2.0, 3.0, 4.0, f64::NAN], &layout).is_err());
}

#[test]
fn index_extraction_takes_low_bits_little_endian() {
    let mut hash = [0u8; 64];
    hash[0] = 0xFF;
    hash[1] = 0x01;
    assert_eq!(hash_to_index(&hash, 8), 0xFF);
    assert_eq!(hash_to_index(&hash, 16), 0x01FF);
    // 4-bit overhang takes the low nibble of the next byte.
    assert_eq!(hash_to_index(&hash, 12), 0x1FF);

    let mut hash = [0xFFu8; 64];
    hash[15] = 0xFF;
    assert_eq!(hash_to_index(&hash, 127), (1u128 << 127) - 1);
}

#[test]
fn psi_and_ot_index_are_consistent_with_long_hash() {
    let layout = layout();
    let r = Record::with_hash_key(vec![1.0, 22.0, 3.0, 4.0, 5.0], &KEY, &layout).unwrap();
    let hash = r.long_hash(&layout).unwrap();
    assert_eq!(r.psi_index(&layout, 127).unwrap(), hash_to_index(hash, 127));
    assert_eq!(
        r.ot_index(&layout, 20).unwrap() as u128,
        hash_to_index(hash, 20)
    );
    // The OT index is the low bits of the PSI index.
    assert_eq!(
        r.ot_index(&layout, 20).unwrap() as u128,
        r.psi_index(&layout, 127).unwrap() & ((1 << 20) - 1)
    );
}

#[test]
fn envelope_round_trip_restores_exact_doubles() {
    let layout = layout();
    let values = vec![1.0, 22.0, 3.25, -4.5, 5.125];
    let r = Record::with_hash_key(values.clone(), &KEY, &layout).unwrap();
    let exchange_key = [0xAB; 16];
    let env = r.encrypt(&exchange_key, &layout).unwrap();

    let hash = r.long_hash(&layout).unwrap().to_vec();
    let decrypted = envelope::decrypt(&env, &exchange_key, Some(&hash)).unwrap();
    assert_eq!(decrypted, values);
}

#[test]
fn envelope_rejects_any_tampering() {
    let layout = layout();
    let r =
        Record::with_hash_key(vec![1.0, 22.0, 3.0, 4.0, 5.0], &KEY, &layout).unwrap();
    let exchange_key = [0xAB; 16];
    let env = r.encrypt(&exchange_key, &layout).unwrap();

    // Single-bit flips in every field must fail closed.
    let mut bad = env.clone();
    bad.nonce[0] ^= 1;
    assert!(envelope::decrypt(&bad, &exchange_key, None).is_err());

    let mut bad = env.clone();
    bad.ciphertext[0] ^= 1;
    assert!(envelope::decrypt(&bad, &exchange_key, None).is_err());

    let mut bad = env.clone();
    bad.mac[0] ^= 1;
    assert!(envelope::decrypt(&bad, &exchange_key, None).is_err());

    let mut bad = env.clone();
    bad.length[0] ^= 1;
    assert!(envelope::decrypt(&bad, &exchange_key, None).is_err());

    let mut bad = env.clone();
    bad.hash[0] ^= 1;
    assert!(envelope::decrypt(&bad, &exchange_key, None).is_err());

    // Wrong key.
    assert!(envelope::decrypt(&env, &[0xCD; 16], None).is_err());

    // Hash differing from the requester's expectation fails even though
    // the tag would verify.
    let other = [0u8; 64];
    assert!(envelope::decrypt(&env, &exchange_key, Some(&other)).is_err());
}

#[test]
fn envelope_json_round_trip() {
    let layout = layout();
    let r =
        Record::with_hash_key(vec![1.0, 22.0, 3.0, 4.0, 5.0], &KEY, &layout).unwrap();
    let env = r.encrypt(&[0xAB; 16], &layout).unwrap();
    let json = env.to_json().unwrap();
    let back = envelope::CiphertextEnvelope::from_json(&json).unwrap();
    assert_eq!(env, back);
}

#[test]
fn upload_format_carries_owner_and_base64_hash() {
    let layout = layout();
    let mut r =
        Record::with_hash_key(vec![1.0, 22.0, 3.0, 4.0, 5.0], &KEY, &layout).unwrap();
    assert!(r.upload_format(&[0xAB; 16], &layout).is_err());
    r.set_owner("provider-1");
    let (hash_b64, env, owner) = r.upload_format(&[0xAB; 16], &layout).unwrap();
    assert_eq!(hash_b64, r.long_hash_b64(&layout).unwrap());
    assert_eq!(env.hash_b64(), hash_b64);
    assert_eq!(owner, "provider-1");
}

proptest! {
    #[test]
    fn envelope_round_trip_for_random_records(
        values in proptest::collection::vec(-1e6f64..1e6, 5),
        exchange_key in proptest::array::uniform16(any::<u8>()),
    ) {
        let layout = layout();
        let r = Record::with_hash_key(values.clone(), &KEY, &layout).unwrap();
        let env = r.encrypt(&exchange_key, &layout).unwrap();
        let hash = r.long_hash(&layout).unwrap().to_vec();
        let decrypted = envelope::decrypt(&env, &exchange_key, Some(&hash)).unwrap();
        prop_assert_eq!(decrypted, values);
    }
}
