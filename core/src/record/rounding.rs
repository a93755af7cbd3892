//! Significant-figure rounding of identifier values.
//!
//! The rounding quantises the identifier space: two values that fall into
//! the same cell round to bit-identical floats and therefore hash to the
//! same long hash. This is the only similarity mechanism in the system, so
//! the exact rounding rule is part of the wire format.

/// Order of magnitude of `n` in scientific representation.
///
/// Defined for non-zero input only: the largest `p` with `10^p <= |n|` when
/// `|n| >= 1`, otherwise the (negative) first `p` with `10^p <= |n|`.
pub fn power_of(n: f64) -> i32 {
    debug_assert!(n != 0.0, "power of zero is undefined");
    let abs_n = n.abs();
    let mut power = 0i32;
    if abs_n >= 1.0 {
        while 10f64.powi(power + 1) <= abs_n {
            power += 1;
        }
    } else {
        while 10f64.powi(power) > abs_n {
            power -= 1;
        }
    }
    power
}

/// Round to `digits` decimal places with correctly-rounded decimal
/// semantics (ties to even), matching the behaviour the stored hashes were
/// produced with.
pub(crate) fn round_dec(x: f64, digits: u32) -> f64 {
    format!("{:.*}", digits as usize, x).parse().unwrap_or(x)
}

/// Round `n` to `rnd` significant figures, counting digits before the
/// decimal point. `rnd = 0` returns the exact value.
///
/// Examples for `rnd = 3`:
/// 1.1111 -> 1.11, 22.2222 -> 22.2, 222.2222 -> 222.0, 2222.2 -> 2220.0,
/// 66666.7 -> 66700.0.
pub fn round_sig(n: f64, rnd: u32) -> f64 {
    if rnd == 0 || n == 0.0 {
        return n;
    }
    let power = power_of(n);
    // Normalise to one digit before the point, round there, denormalise.
    let scaled = n * 10f64.powi(-power);
    let scaled = round_dec(scaled, rnd - 1);
    let back = scaled * 10f64.powi(power);
    // Second decimal rounding erases the floating-point noise the
    // denormalisation reintroduces.
    let fac = (rnd as i32 - 1 - power).max(0) as u32;
    round_dec(back, fac)
}

/// Smallest representable step at the order of magnitude of `n` under
/// `rnd` significant figures: 0.01 for 1.11 at rnd 3, 0.1 for 99 at rnd 3,
/// 1 for 100 at rnd 3. `rnd = 0` treats the value as an exact integer with
/// step 1.
pub fn smallest_step(n: f64, rnd: u32) -> f64 {
    if rnd == 0 {
        return 1.0;
    }
    if n == 0.0 {
        return 10f64.powi(1 - rnd as i32);
    }
    let power = power_of(n);
    10f64.powi(power + 1 - rnd as i32)
}
