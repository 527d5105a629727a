//! Delivery unit consumed from the provider, and the classification the
//! validator assigns it (spec §4.3, §6).

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Where an envelope came from. `Backtracking` is the slower catch-up
/// stream; a gap reported by it means the fast stream has already missed
/// events (spec §4.3 rationale, glossary).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "testing", derive(proptest_derive::Arbitrary))]
pub enum Origin {
    Live,
    Backtracking,
    PubSub,
}

/// One delivery unit. `event` is `None` when delivered via `Backtracking`
/// as a placeholder and must be lazily loaded via
/// [`crate::provider::EventSourceProvider::load_envelope`] before the
/// handler runs.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope<E> {
    pub pid: String,
    pub seq_nr: u64,
    pub timestamp: SystemTime,
    pub event: Option<E>,
    pub origin: Origin,
    pub filtered: bool,
}

impl<E> Envelope<E> {
    pub fn new(
        pid: impl Into<String>,
        seq_nr: u64,
        timestamp: SystemTime,
        event: Option<E>,
        origin: Origin,
        filtered: bool,
    ) -> Self {
        Self {
            pid: pid.into(),
            seq_nr,
            timestamp,
            event,
            origin,
            filtered,
        }
    }

    /// Whether this envelope needs [`crate::provider::EventSourceProvider::load_envelope`]
    /// before the handler can run.
    pub fn needs_load(&self) -> bool {
        self.event.is_none()
    }
}

/// The validator's classification of an envelope (spec §4.3 table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validation {
    /// Either the first event for a new pid (`seq_nr == 1`), or the
    /// immediate successor of the last accepted `seq_nr` for this pid.
    Accepted,
    /// Already observed: `seq_nr <= ` the last accepted `seq_nr` for this pid.
    Duplicate,
    /// An ordinary, recoverable-by-waiting gap on the live/pubsub stream.
    RejectedSeqNr { expected_next: u64, got: u64 },
    /// A gap surfaced by the backtracking stream; recoverable only via
    /// explicit replay.
    RejectedBacktrackingSeqNr { expected_next: u64, got: u64 },
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            Validation::RejectedSeqNr { .. } | Validation::RejectedBacktrackingSeqNr { .. }
        )
    }
}
