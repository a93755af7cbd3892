//! Similarity-candidate enumerator.
//!
//! A query vector together with an offset policy defines a per-dimension
//! envelope `[min[i], max[i]]` over the rounded identifier space. The
//! enumerator walks that envelope lazily as an odometer, yielding every
//! rounded vector exactly once. `len` is a closed form (no iteration) and
//! `split` partitions an unused enumerator into independent sub-enumerators
//! for parallel matching.
//!
//! The three historical metric variants collapse into one generic iterator
//! driven by a tagged policy.

use crate::config::RecordLayout;
use crate::record::rounding::{power_of, round_sig, smallest_step};
use crate::types::ExchangeError;

/// Envelope policy around the query.
#[derive(Debug, Clone, PartialEq)]
pub enum OffsetPolicy {
    /// `[q - d, q + d]` on every identifier dimension.
    Absolute(f64),
    /// `[q * (1 - d/100), q * (1 + d/100)]` on every identifier dimension.
    Relative(f64),
    /// A percentage offset per dimension; `positive_only` keeps the lower
    /// bound at the query value.
    PerDimension {
        offsets: Vec<f64>,
        positive_only: bool,
    },
}

impl OffsetPolicy {
    /// Map a metric name to a policy. `offset-N` and `absOffset-N` are
    /// aliases for the absolute metric; `relOffset-N` is relative. `N` may
    /// carry a decimal part.
    pub fn parse(name: &str) -> Result<Self, ExchangeError> {
        let (policy, raw): (fn(f64) -> OffsetPolicy, &str) =
            if let Some(rest) = name.strip_prefix("absOffset-") {
                (OffsetPolicy::Absolute, rest)
            } else if let Some(rest) = name.strip_prefix("offset-") {
                (OffsetPolicy::Absolute, rest)
            } else if let Some(rest) = name.strip_prefix("relOffset-") {
                (OffsetPolicy::Relative, rest)
            } else {
                return Err(ExchangeError::Config(format!(
                    "no similarity metric with name {name} exists"
                )));
            };
        let value: f64 = raw.parse().map_err(|_| {
            ExchangeError::Config(format!("invalid offset in metric name {name}"))
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(ExchangeError::Config(format!(
                "invalid offset in metric name {name}"
            )));
        }
        Ok(policy(value))
    }
}

/// Lazy odometer over the rounded vectors inside an offset envelope.
///
/// Identifier positions advance from the rightmost position; suffix
/// positions are fixed to the query value. Increments are recomputed
/// whenever a position crosses a power-of-ten boundary.
#[derive(Debug, Clone)]
pub struct OffsetIterator {
    rounding_vec: Vec<u32>,
    id_len: usize,
    /// Lower envelope bound per identifier position; suffix positions hold
    /// the fixed query values.
    min: Vec<f64>,
    /// Upper envelope bound, identifier positions only.
    max: Vec<f64>,
    increments: Vec<f64>,
    cur: Vec<f64>,
    pos: isize,
    end: bool,
}

impl OffsetIterator {
    pub fn new(
        target: &[f64],
        policy: &OffsetPolicy,
        layout: &RecordLayout,
    ) -> Result<Self, ExchangeError> {
        let id_len = layout.id_length;
        let rounding_vec = layout.rounding_vec.clone();
        if rounding_vec.len() != id_len {
            return Err(ExchangeError::Config(format!(
                "rounding vector has {} entries for identifier length {}",
                rounding_vec.len(),
                id_len
            )));
        }
        if target.len() < id_len {
            return Err(ExchangeError::Config(format!(
                "query of {} elements is shorter than the identifier length {}",
                target.len(),
                id_len
            )));
        }
        if let OffsetPolicy::PerDimension { offsets, .. } = policy {
            if offsets.len() != id_len {
                return Err(ExchangeError::Config(format!(
                    "offset list of {} entries has to have identifier length {}",
                    offsets.len(),
                    id_len
                )));
            }
        }

        let mut min = Vec::with_capacity(target.len());
        let mut max = Vec::with_capacity(id_len);
        let mut increments = Vec::with_capacity(id_len);
        for (i, &e) in target.iter().enumerate() {
            if i < id_len {
                let rnd = rounding_vec[i];
                let (lo_raw, hi_raw) = match policy {
                    OffsetPolicy::Absolute(d) => (e - d, e + d),
                    OffsetPolicy::Relative(d) => {
                        (e * (1.0 - d / 100.0), e * (1.0 + d / 100.0))
                    }
                    OffsetPolicy::PerDimension {
                        offsets,
                        positive_only,
                    } => {
                        let d = offsets[i] / 100.0;
                        let lo = if *positive_only { e } else { e * (1.0 - d) };
                        (lo, e * (1.0 + d))
                    }
                };
                let mut lo = round_sig(lo_raw, rnd);
                let hi = round_sig(hi_raw, rnd);
                let inc = smallest_step(lo, rnd);
                if lo + inc > hi {
                    // Adjacent-cell conflict across a power-of-10 boundary
                    // (e.g. 99 vs 100): pin the position to the query value.
                    lo = e;
                }
                min.push(lo);
                max.push(hi);
                increments.push(inc);
            } else {
                min.push(e);
            }
        }
        let cur = min.clone();
        Ok(Self {
            rounding_vec,
            id_len,
            min,
            max,
            increments,
            cur,
            pos: id_len as isize - 1,
            end: false,
        })
    }

    /// Number of vectors this enumerator yields, computed without
    /// iteration. Per-position counts account for the increment changing
    /// across a power-of-ten boundary inside the envelope.
    pub fn len(&self) -> usize {
        let mut total: u128 = 1;
        for i in 0..self.id_len {
            total *= self.position_count(i) as u128;
        }
        total as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position_count(&self, i: usize) -> u64 {
        let rnd = self.rounding_vec[i];
        let mut possibilities: i64 = 0;
        let mut cur_min = self.min[i];
        let mut inc = smallest_step(cur_min, rnd);
        let power = if cur_min == 0.0 {
            0
        } else {
            power_of(cur_min) + 1
        };
        if 10f64.powi(power) < self.max[i] {
            // The envelope crosses into the next decade; count up to the
            // boundary with the current step, then continue with the wider
            // one. The half-step guards against float imprecision.
            let cur_max = 10f64.powi(power);
            possibilities += ((cur_max - cur_min + 0.5 * inc) / inc).trunc() as i64;
            inc = smallest_step(cur_max, rnd);
            cur_min = cur_max;
        }
        possibilities += ((self.max[i] - cur_min + 0.5 * inc) / inc).trunc() as i64;
        // min and max themselves are always contained.
        (possibilities + 1).max(0) as u64
    }

    /// Partition an unused enumerator into at least `n` (if possible)
    /// contiguous sub-enumerators on dimension `j`, recursing to `j + 1`
    /// when the dimension yields fewer. The union of the outputs equals
    /// this enumerator's output and the outputs are pairwise disjoint.
    pub fn split(&self, n: usize, j: usize) -> Result<Vec<OffsetIterator>, ExchangeError> {
        if n == 0 || j >= self.id_len {
            return Err(ExchangeError::Config(format!(
                "cannot split into {n} parts on dimension {j}"
            )));
        }
        if self.cur != self.min || self.end {
            return Err(ExchangeError::Config(
                "cannot split a used enumerator".into(),
            ));
        }
        let rnd = self.rounding_vec[j];
        let inc = self.increments[j];
        let mut diff = (self.max[j] - self.min[j]) / n as f64;
        diff = (diff / inc).max(1.0);

        let mut parts: Vec<OffsetIterator> = Vec::new();
        for i in 0..n {
            if i == 0 {
                let mut it = self.clone();
                it.min[j] = round_sig(it.min[j], rnd);
                it.max[j] = round_sig(it.min[j] + diff.trunc() * inc, rnd);
                parts.push(it);
            } else {
                let prev_max = parts[parts.len() - 1].max[j];
                let next_min = round_sig(prev_max + inc, rnd);
                if next_min <= self.max[j] {
                    let mut it = self.clone();
                    it.min[j] = next_min;
                    it.max[j] =
                        round_sig(self.min[j] + ((i + 1) as f64 * diff).trunc() * inc, rnd);
                    parts.push(it);
                } else {
                    break;
                }
            }
        }
        // The last subrange runs to the original upper bound.
        let last = parts.len() - 1;
        parts[last].max[j] = self.max[j];
        for it in &mut parts {
            it.cur = it.min.clone();
        }

        if parts.len() < n && j < self.id_len - 1 {
            let sub_num = (n - 1) / parts.len();
            let mut finer = Vec::new();
            for it in &parts {
                finer.extend(it.split(sub_num, j + 1)?);
            }
            Ok(finer)
        } else {
            Ok(parts)
        }
    }
}

impl Iterator for OffsetIterator {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Vec<f64>> {
        if self.end {
            return None;
        }
        let state = self.cur.clone();

        // Walk left over exhausted positions, resetting each to its lower
        // bound. The reset may move the value down a decade, so the
        // increment is recomputed.
        let mut pos = self.pos;
        while pos >= 0 && {
            let p = pos as usize;
            round_sig(self.cur[p] + self.increments[p], self.rounding_vec[p]) > self.max[p]
        } {
            let p = pos as usize;
            self.cur[p] = self.min[p];
            self.increments[p] = smallest_step(self.cur[p], self.rounding_vec[p]);
            pos -= 1;
        }

        if pos >= 0 {
            let p = pos as usize;
            self.cur[p] = round_sig(self.cur[p] + self.increments[p], self.rounding_vec[p]);
            // The step may carry the value over a power of ten, widening
            // the increment.
            self.increments[p] = smallest_step(self.cur[p], self.rounding_vec[p]);
            self.pos = self.id_len as isize - 1;
        } else {
            self.end = true;
        }
        Some(state)
    }
}
