//! Rounding and increment behaviour of the record codec.

use exchange_core::record::rounding::{power_of, round_sig};
use exchange_core::record::smallest_step;

#[test]
fn power_of_matches_scientific_representation() {
    assert_eq!(power_of(1.0), 0);
    assert_eq!(power_of(9.99), 0);
    assert_eq!(power_of(10.0), 1);
    assert_eq!(power_of(99.0), 1);
    assert_eq!(power_of(100.0), 2);
    assert_eq!(power_of(2222.0), 3);
    assert_eq!(power_of(0.5), -1);
    assert_eq!(power_of(0.09), -2);
    assert_eq!(power_of(-44.0), 1);
}

#[test]
fn round_sig_keeps_three_significant_figures() {
    assert_eq!(round_sig(1.1111, 3), 1.11);
    assert_eq!(round_sig(22.2222, 3), 22.2);
    assert_eq!(round_sig(222.2222, 3), 222.0);
    assert_eq!(round_sig(2222.2222, 3), 2220.0);
    assert_eq!(round_sig(66666.66666, 3), 66700.0);
}

#[test]
fn round_sig_zero_is_exact() {
    assert_eq!(round_sig(0.0, 3), 0.0);
    assert_eq!(round_sig(1.2345, 0), 1.2345);
    assert_eq!(round_sig(-1.2345, 0), -1.2345);
}

#[test]
fn round_sig_negative_values() {
    assert_eq!(round_sig(-1.1111, 3), -1.11);
    assert_eq!(round_sig(-66666.66666, 3), -66700.0);
}

#[test]
fn round_sig_small_magnitudes() {
    assert_eq!(round_sig(0.0123456, 3), 0.0123);
    assert_eq!(round_sig(0.0008881, 2), 0.00089);
}

#[test]
fn smallest_step_tracks_order_of_magnitude() {
    assert_eq!(smallest_step(44.0, 3), 0.1);
    assert_eq!(smallest_step(1.0, 3), 0.01);
    assert_eq!(smallest_step(1111.0, 3), 10.0);
    assert_eq!(smallest_step(-99.0, 3), 0.1);
    assert_eq!(smallest_step(-100.0, 3), 1.0);
    assert_eq!(smallest_step(-0.03, 3), 0.0001);
}

#[test]
fn smallest_step_exact_values_step_by_one() {
    assert_eq!(smallest_step(7.0, 0), 1.0);
    assert_eq!(smallest_step(10.0, 0), 1.0);
    assert_eq!(smallest_step(0.1, 0), 1.0);
}

#[test]
fn smallest_step_at_zero() {
    assert_eq!(smallest_step(0.0, 3), 0.01);
}

#[test]
fn rounding_is_stable_under_increment_noise() {
    // Walking an envelope accumulates float noise; re-rounding each step
    // must land exactly on the grid.
    let mut x = 1.9f64;
    for _ in 0..20 {
        x = round_sig(x + 0.01, 3);
    }
    assert_eq!(x, 2.1);
}
