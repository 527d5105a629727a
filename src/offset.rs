//! A slice's resume point.

use std::{collections::BTreeMap, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Captures a slice's resume point: all events with `timestamp < timestamp`
/// are fully observed; `seen` enumerates the `(pid, seqNr)` pairs observed
/// at exactly `timestamp`, so they can be recognized as duplicates on
/// restart (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampOffset {
    pub timestamp: SystemTime,
    pub seen: BTreeMap<String, u64>,
}

impl TimestampOffset {
    pub fn new(timestamp: SystemTime, seen: BTreeMap<String, u64>) -> Self {
        Self { timestamp, seen }
    }

    /// Whether `(pid, seq_nr)` is recognized as already-observed at this
    /// resume point.
    pub fn is_seen(&self, pid: &str, seq_nr: u64) -> bool {
        matches!(self.seen.get(pid), Some(&s) if s >= seq_nr)
    }
}
