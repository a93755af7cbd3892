//! Phase timing for retrieval and ingest runs.
//!
//! The orchestrator emits a marker after every phase; the accumulated
//! durations are kept per phase so a host can ship them to its own
//! telemetry sink.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Candidates,
    HashKey,
    Matching,
    KeyRetrieval,
    RecordFetch,
    Decryption,
    Hashing,
    Encryption,
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Candidates => "candidates",
            Phase::HashKey => "hash_key",
            Phase::Matching => "matching",
            Phase::KeyRetrieval => "key_retrieval",
            Phase::RecordFetch => "record_fetch",
            Phase::Decryption => "decryption",
            Phase::Hashing => "hashing",
            Phase::Encryption => "encryption",
            Phase::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Accumulated per-phase durations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimes {
    times: HashMap<Phase, Duration>,
}

impl PhaseTimes {
    pub fn add(&mut self, phase: Phase, dur: Duration) {
        *self.times.entry(phase).or_insert(Duration::ZERO) += dur;
    }

    pub fn get(&self, phase: Phase) -> Duration {
        self.times.get(&phase).copied().unwrap_or(Duration::ZERO)
    }

    pub fn total(&self) -> Duration {
        self.times.values().copied().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Phase, &Duration)> {
        self.times.iter()
    }
}

/// Monotonic timer that records the elapsed time since the previous marker
/// under the given phase.
#[derive(Debug, Clone)]
pub struct PhaseTimer {
    start: Instant,
    last: Instant,
    times: PhaseTimes,
}

impl PhaseTimer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            times: PhaseTimes::default(),
        }
    }

    /// Close the current phase and return its duration.
    pub fn mark(&mut self, phase: Phase) -> Duration {
        let now = Instant::now();
        let dur = now.duration_since(self.last);
        self.last = now;
        self.times.add(phase, dur);
        dur
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn times(&self) -> &PhaseTimes {
        &self.times
    }

    pub fn into_times(self) -> PhaseTimes {
        self.times
    }
}

/// Human-readable duration, scaled from milliseconds up to hours.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms < 3_600_000.0 {
        let sec = ms / 1000.0;
        let minutes = (sec / 60.0).floor() as u64;
        format!("{}min {:.2}s", minutes, sec % 60.0)
    } else {
        let sec = ms / 1000.0;
        let minutes = (sec / 60.0).floor() as u64;
        let hours = minutes / 60;
        format!("{}h {}min {:.2}s", hours, minutes % 60, sec % 60.0)
    }
}
