//! Base oblivious transfers.
//!
//! The extension is seeded by kappa 1-out-of-2 OTs on random seeds,
//! realised with an elliptic-curve Diffie-Hellman construction over
//! ristretto255: the base sender publishes `A = a*G`, the base receiver
//! answers `B_i = b_i*G` or `B_i = b_i*G + A` depending on its choice bit,
//! and both ends hash the shared points into 32-byte seeds.
//!
//! Roles are reversed relative to the extension: the extension *receiver*
//! acts as base sender and holds both seeds of every pair, the extension
//! *sender* obtains the seed selected by its secret column bits.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;

use crate::transport::{tag, Conn};
use crate::types::ExchangeError;

/// Seed derived from one DH point.
pub(crate) type Seed = [u8; 32];

const POINT_LEN: usize = 32;

fn hash_point(index: usize, point: &RistrettoPoint) -> Seed {
    let mut h = blake3::Hasher::new();
    h.update(b"base-ot seed");
    h.update(&(index as u32).to_le_bytes());
    h.update(point.compress().as_bytes());
    *h.finalize().as_bytes()
}

fn decompress(buf: &[u8]) -> Result<RistrettoPoint, ExchangeError> {
    CompressedRistretto::from_slice(buf)
        .map_err(|_| ExchangeError::Protocol("malformed curve point".into()))?
        .decompress()
        .ok_or_else(|| ExchangeError::Protocol("invalid curve point".into()))
}

/// Run the base-OT sender side: produce `count` seed pairs of which the
/// peer learns exactly one each.
pub(crate) fn base_send(conn: &mut Conn, count: usize) -> Result<Vec<(Seed, Seed)>, ExchangeError> {
    let a = Scalar::random(&mut OsRng);
    let big_a = RistrettoPoint::mul_base(&a);
    conn.send(tag::BASE_POINT, big_a.compress().as_bytes())?;

    let payload = conn.recv_expect(tag::BASE_KEYS)?;
    if payload.len() != count * POINT_LEN {
        return Err(ExchangeError::Protocol(format!(
            "expected {count} base-OT points, got {} bytes",
            payload.len()
        )));
    }

    let a_big_a = big_a * a;
    let mut pairs = Vec::with_capacity(count);
    for (i, chunk) in payload.chunks_exact(POINT_LEN).enumerate() {
        let b_point = decompress(chunk)?;
        let shared = b_point * a;
        let k0 = hash_point(i, &shared);
        let k1 = hash_point(i, &(shared - a_big_a));
        pairs.push((k0, k1));
    }
    Ok(pairs)
}

/// Run the base-OT receiver side: obtain one seed per choice bit.
pub(crate) fn base_receive(conn: &mut Conn, choices: &[bool]) -> Result<Vec<Seed>, ExchangeError> {
    let payload = conn.recv_expect(tag::BASE_POINT)?;
    if payload.len() != POINT_LEN {
        return Err(ExchangeError::Protocol("malformed base-OT opening".into()));
    }
    let big_a = decompress(&payload)?;

    let mut points = Vec::with_capacity(choices.len() * POINT_LEN);
    let mut seeds = Vec::with_capacity(choices.len());
    for (i, &c) in choices.iter().enumerate() {
        let b = Scalar::random(&mut OsRng);
        let mut point = RistrettoPoint::mul_base(&b);
        if c {
            point += big_a;
        }
        points.extend_from_slice(point.compress().as_bytes());
        seeds.push(hash_point(i, &(big_a * b)));
    }
    conn.send(tag::BASE_KEYS, &points)?;
    Ok(seeds)
}
