//! Classifies incoming envelopes against [`State`] (spec §4.3).

use std::collections::HashMap;

use crate::{
    envelope::{Envelope, Origin, Validation},
    record::Record,
    slice::slice,
    state::State,
};

/// Validates envelopes against a [`State`] and tracks accepted-but-not-yet-
/// committed envelopes ("in-flight", spec §4.3 step 4, glossary).
pub struct Validator {
    in_flight: HashMap<String, u64>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            in_flight: HashMap::new(),
        }
    }

    /// Classifies `envelope` against `state` per the spec §4.3 table. Does
    /// not mutate `state` — the driver applies `Accepted` records via
    /// [`State::add`] only once the handler has run (or immediately, for
    /// `AtMostOnce`).
    pub fn validate<E>(&mut self, state: &State, envelope: &Envelope<E>) -> Validation {
        let prev_seq_nr = state.stored_seq_nr(&envelope.pid);

        let classification = match prev_seq_nr {
            Some(prev) if envelope.seq_nr <= prev => Validation::Duplicate,
            None if envelope.seq_nr == 1 => Validation::Accepted,
            Some(prev) if envelope.seq_nr == prev + 1 => Validation::Accepted,
            None => {
                let expected_next = 1;
                if envelope.origin == Origin::Backtracking {
                    Validation::RejectedBacktrackingSeqNr {
                        expected_next,
                        got: envelope.seq_nr,
                    }
                } else {
                    Validation::RejectedSeqNr {
                        expected_next,
                        got: envelope.seq_nr,
                    }
                }
            },
            Some(prev) => {
                let expected_next = prev + 1;
                if envelope.origin == Origin::Backtracking {
                    Validation::RejectedBacktrackingSeqNr {
                        expected_next,
                        got: envelope.seq_nr,
                    }
                } else {
                    Validation::RejectedSeqNr {
                        expected_next,
                        got: envelope.seq_nr,
                    }
                }
            },
        };

        if classification.is_accepted() {
            self.in_flight.insert(envelope.pid.clone(), envelope.seq_nr);
        }
        classification
    }

    /// Builds the [`Record`] an accepted envelope should be committed as.
    pub fn record_for<E>(&self, envelope: &Envelope<E>) -> Record {
        Record {
            slice: slice(&envelope.pid),
            pid: envelope.pid.clone(),
            seq_nr: envelope.seq_nr,
            timestamp: envelope.timestamp,
        }
    }

    /// Marks `pid`'s in-flight envelope as committed, clearing it from the
    /// in-flight set.
    pub fn mark_committed(&mut self, pid: &str, seq_nr: u64) {
        if self.in_flight.get(pid) == Some(&seq_nr) {
            self.in_flight.remove(pid);
        }
    }

    pub fn is_in_flight(&self, pid: &str) -> bool {
        self.in_flight.contains_key(pid)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn env(pid: &str, seq_nr: u64, origin: Origin) -> Envelope<()> {
        Envelope::new(pid, seq_nr, SystemTime::UNIX_EPOCH, Some(()), origin, false)
    }

    #[test]
    fn first_event_accepted() {
        let state = State::empty();
        let mut v = Validator::new();
        assert_eq!(
            v.validate(&state, &env("p1", 1, Origin::Live)),
            Validation::Accepted
        );
    }

    #[test]
    fn immediate_successor_accepted() {
        let mut state = State::empty();
        state.add([Record::new("p1", 3, SystemTime::UNIX_EPOCH)]);
        let mut v = Validator::new();
        assert_eq!(
            v.validate(&state, &env("p1", 4, Origin::Live)),
            Validation::Accepted
        );
    }

    #[test]
    fn replay_of_seen_seq_nr_is_duplicate() {
        let mut state = State::empty();
        state.add([Record::new("p1", 3, SystemTime::UNIX_EPOCH)]);
        let mut v = Validator::new();
        assert_eq!(
            v.validate(&state, &env("p1", 3, Origin::Live)),
            Validation::Duplicate
        );
        assert_eq!(
            v.validate(&state, &env("p1", 2, Origin::Live)),
            Validation::Duplicate
        );
    }

    // Scenario 5 (spec §8): backtracking gap triggers replay classification.
    #[test]
    fn backtracking_gap_is_rejected_backtracking() {
        let mut state = State::empty();
        state.add([Record::new("p1", 3, SystemTime::UNIX_EPOCH)]);
        let mut v = Validator::new();
        let result = v.validate(&state, &env("p1", 7, Origin::Backtracking));
        assert_eq!(
            result,
            Validation::RejectedBacktrackingSeqNr {
                expected_next: 4,
                got: 7
            }
        );
    }

    #[test]
    fn live_gap_is_rejected_seq_nr_not_backtracking() {
        let mut state = State::empty();
        state.add([Record::new("p1", 3, SystemTime::UNIX_EPOCH)]);
        let mut v = Validator::new();
        let result = v.validate(&state, &env("p1", 7, Origin::Live));
        assert_eq!(
            result,
            Validation::RejectedSeqNr {
                expected_next: 4,
                got: 7
            }
        );
    }

    #[test]
    fn unknown_pid_with_seq_nr_greater_than_one_is_rejected() {
        let state = State::empty();
        let mut v = Validator::new();
        assert_eq!(
            v.validate(&state, &env("new-pid", 5, Origin::Live)),
            Validation::RejectedSeqNr {
                expected_next: 1,
                got: 5
            }
        );
        assert_eq!(
            v.validate(&state, &env("new-pid-2", 5, Origin::Backtracking)),
            Validation::RejectedBacktrackingSeqNr {
                expected_next: 1,
                got: 5
            }
        );
    }

    // Property P5: exactly one of {Accepted, RejectedSeqNr,
    // RejectedBacktrackingSeqNr} applies to any non-duplicate envelope.
    #[test]
    fn validator_completeness_for_non_duplicates() {
        let mut state = State::empty();
        state.add([Record::new("p1", 3, SystemTime::UNIX_EPOCH)]);
        let mut v = Validator::new();
        for (seq_nr, origin) in [
            (4, Origin::Live),
            (4, Origin::Backtracking),
            (9, Origin::Live),
            (9, Origin::Backtracking),
        ] {
            let result = v.validate(&state, &env("p1", seq_nr, origin));
            assert_ne!(result, Validation::Duplicate);
            let matches = [
                result == Validation::Accepted,
                matches!(result, Validation::RejectedSeqNr { .. }),
                matches!(result, Validation::RejectedBacktrackingSeqNr { .. }),
            ];
            assert_eq!(matches.iter().filter(|b| **b).count(), 1);
        }
    }

    #[test]
    fn in_flight_tracks_accepted_until_committed() {
        let state = State::empty();
        let mut v = Validator::new();
        v.validate(&state, &env("p1", 1, Origin::Live));
        assert!(v.is_in_flight("p1"));
        v.mark_committed("p1", 1);
        assert!(!v.is_in_flight("p1"));
    }
}
