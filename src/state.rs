//! The per-projection in-memory offset-tracking structure (spec §3, §4.2).

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::{Duration, SystemTime},
};

use crate::{offset::TimestampOffset, record::Record};

/// Per-projection in-memory state: the latest observed record per pid, a
/// per-slice sorted index of those records, and the max observed
/// timestamp. See spec §3 for the invariants this type maintains
/// (I1-I5).
#[derive(Clone, Debug, Default)]
pub struct State {
    by_pid: HashMap<String, Record>,
    by_slice_sorted: HashMap<u16, BTreeSet<Record>>,
    latest_timestamp: Option<SystemTime>,
}

impl State {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The latest seq_nr recorded for `pid`, if any. Used by the replay
    /// trigger (spec §4.6) and the validator.
    pub fn stored_seq_nr(&self, pid: &str) -> Option<u64> {
        self.by_pid.get(pid).map(|r| r.seq_nr)
    }

    pub fn record_for(&self, pid: &str) -> Option<&Record> {
        self.by_pid.get(pid)
    }

    pub fn latest_timestamp(&self) -> Option<SystemTime> {
        self.latest_timestamp
    }

    /// `isDuplicate`: true iff a record for `r.pid` with `seq_nr >= r.seq_nr`
    /// has already been added (spec §4.2, property P2).
    pub fn is_duplicate(&self, pid: &str, seq_nr: u64) -> bool {
        matches!(self.by_pid.get(pid), Some(r) if r.seq_nr >= seq_nr)
    }

    /// Applies a batch of already-validated records. Order of `records`
    /// does not affect the result: each pid's entry ends up holding
    /// whichever record has the greatest `(timestamp, seq_nr)`, which for
    /// validator-accepted input is always the most recently accepted one.
    pub fn add(&mut self, records: impl IntoIterator<Item = Record>) {
        for r in records {
            self.latest_timestamp = Some(match self.latest_timestamp {
                Some(t) => t.max(r.timestamp),
                None => r.timestamp,
            });

            if let Some(prev) = self.by_pid.get(&r.pid) {
                let slice_set = self.by_slice_sorted.entry(prev.slice).or_default();
                slice_set.remove(prev);
            }
            self.by_slice_sorted
                .entry(r.slice)
                .or_default()
                .insert(r.clone());
            self.by_pid.insert(r.pid.clone(), r);
        }
    }

    /// Removes records from `slice` older than `latestTimestamp - time_window`,
    /// always retaining at least one (the latest by sort order) record for
    /// any slice that has ever held one. Never touches other slices (spec
    /// §4.2, property P3).
    pub fn evict(&mut self, slice: u16, time_window: Duration) -> usize {
        let Some(latest) = self.latest_timestamp else {
            return 0;
        };
        let cutoff = latest.checked_sub(time_window).unwrap_or(SystemTime::UNIX_EPOCH);

        let Some(set) = self.by_slice_sorted.get_mut(&slice) else {
            return 0;
        };
        if set.len() <= 1 {
            return 0;
        }

        let keep_latest = set.iter().next_back().cloned();
        let mut to_remove = Vec::new();
        for r in set.iter() {
            if r.timestamp < cutoff && Some(r) != keep_latest.as_ref() {
                to_remove.push(r.clone());
            }
        }
        for r in &to_remove {
            set.remove(r);
            self.by_pid.remove(&r.pid);
        }
        to_remove.len()
    }

    /// `offsetBySlice`: the slice's resume point, derived from the tail of
    /// `bySliceSorted[slice]` (spec §4.2, property P4). Returns `None` if
    /// this slice has never held a record.
    pub fn offset_by_slice(&self, slice: u16) -> Option<TimestampOffset> {
        let set = self.by_slice_sorted.get(&slice)?;
        let last = set.iter().next_back()?;
        let last_ts = last.timestamp;
        let seen: BTreeMap<String, u64> = set
            .iter()
            .filter(|r| r.timestamp == last_ts)
            .map(|r| (r.pid.clone(), r.seq_nr))
            .collect();
        Some(TimestampOffset::new(last_ts, seen))
    }

    /// All slices currently tracked, for bulk offset reporting.
    pub fn tracked_slices(&self) -> impl Iterator<Item = u16> + '_ {
        self.by_slice_sorted.keys().copied()
    }

    /// Number of records currently tracked for `slice`, used both by tests
    /// and by the driver's eviction-threshold check
    /// (`keepNumberOfEntries`, spec §4.4).
    pub fn len_for_slice(&self, slice: u16) -> usize {
        self.by_slice_sorted.get(&slice).map_or(0, |s| s.len())
    }

    /// Total records tracked across all slices.
    pub fn total_len(&self) -> usize {
        self.by_slice_sorted.values().map(|s| s.len()).sum()
    }
}
