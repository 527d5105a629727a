//! Property test for the validator (spec §8, P5).

use std::time::{Duration, SystemTime};

use proptest::prelude::*;
use projection_offsets::{
    envelope::{Envelope, Origin, Validation},
    record::Record,
    state::State,
    validator::Validator,
};

fn origin_strategy() -> impl Strategy<Value = Origin> {
    prop_oneof![Just(Origin::Live), Just(Origin::Backtracking), Just(Origin::PubSub)]
}

proptest! {
    // P5 (validator completeness): for every non-duplicate envelope, exactly
    // one of {Accepted, RejectedSeqNr, RejectedBacktrackingSeqNr} applies.
    #[test]
    fn p5_validator_completeness(
        prior_seq_nr in prop::option::of(1u64..50),
        incoming_seq_nr in 1u64..60,
        origin in origin_strategy(),
    ) {
        let mut state = State::empty();
        if let Some(prior) = prior_seq_nr {
            state.add([Record::new("p1", prior, SystemTime::UNIX_EPOCH)]);
        }

        let mut v = Validator::new();
        let envelope = Envelope::new(
            "p1",
            incoming_seq_nr,
            SystemTime::UNIX_EPOCH + Duration::from_millis(1),
            Some(()),
            origin,
            false,
        );
        let result = v.validate(&state, &envelope);

        let is_duplicate = matches!(prior_seq_nr, Some(prior) if incoming_seq_nr <= prior);
        if is_duplicate {
            prop_assert_eq!(result, Validation::Duplicate);
        } else {
            prop_assert_ne!(result, Validation::Duplicate);
            let bucket_count = [
                result == Validation::Accepted,
                matches!(result, Validation::RejectedSeqNr { .. }),
                matches!(result, Validation::RejectedBacktrackingSeqNr { .. }),
            ]
            .iter()
            .filter(|b| **b)
            .count();
            prop_assert_eq!(bucket_count, 1);

            // Origin::Backtracking never rejects as a plain RejectedSeqNr and
            // vice versa - the two rejection kinds are mutually exclusive by
            // construction (spec §4.3).
            if result.is_rejected() && origin == Origin::Backtracking {
                prop_assert!(matches!(result, Validation::RejectedBacktrackingSeqNr { .. }));
            }
            if result.is_rejected() && origin != Origin::Backtracking {
                prop_assert!(matches!(result, Validation::RejectedSeqNr { .. }));
            }
        }
    }
}
