//! The core per-pid value type tracked by [`crate::state::State`].

use std::{cmp::Ordering, time::SystemTime};

use derive_more::Display;

use crate::slice::slice;

/// The most recently observed event for one persistence id.
///
/// Invariant: `slice == slice(&pid)` always holds; callers construct a
/// `Record` through [`Record::new`] rather than by hand to keep that true.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
#[display(fmt = "Record(slice={slice}, pid={pid}, seq_nr={seq_nr}, ts={timestamp:?})")]
pub struct Record {
    pub slice: u16,
    pub pid: String,
    pub seq_nr: u64,
    pub timestamp: SystemTime,
}

impl Record {
    pub fn new(pid: impl Into<String>, seq_nr: u64, timestamp: SystemTime) -> Self {
        let pid = pid.into();
        let slice = slice(&pid);
        Self {
            slice,
            pid,
            seq_nr,
            timestamp,
        }
    }
}

/// Ordered by `(timestamp asc, seq_nr asc, pid asc)`, per spec §3 — the
/// ordering `bySliceSorted` relies on for eviction and `offsetBySlice`.
impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.seq_nr.cmp(&other.seq_nr))
            .then_with(|| self.pid.cmp(&other.pid))
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
