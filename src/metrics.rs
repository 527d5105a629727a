//! Metric recording at the same call sites the teacher instruments in
//! `database/src/committer.rs` / `retention.rs` (commit batches, eviction
//! passes), using the public `metrics` facade in place of the teacher's
//! internal `::metrics` crate. No exporter/registry is wired up here — that
//! remains the embedder's job (spec §1 non-goal: "metrics registry").

use std::time::Duration;

use crate::envelope::Validation;

pub fn record_commit_batch(projection_name: &str, slice: u16, batch_size: usize) {
    metrics::histogram!(
        "projection_offset_commit_batch_size",
        "projection" => projection_name.to_string(),
        "slice" => slice.to_string(),
    )
    .record(batch_size as f64);
}

pub fn record_commit_latency(projection_name: &str, elapsed: Duration) {
    metrics::histogram!(
        "projection_offset_commit_seconds",
        "projection" => projection_name.to_string(),
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_validation(projection_name: &str, outcome: &Validation) {
    let label = match outcome {
        Validation::Accepted => "accepted",
        Validation::Duplicate => "duplicate",
        Validation::RejectedSeqNr { .. } => "rejected_seq_nr",
        Validation::RejectedBacktrackingSeqNr { .. } => "rejected_backtracking_seq_nr",
    };
    metrics::counter!(
        "projection_envelope_validation_total",
        "projection" => projection_name.to_string(),
        "outcome" => label,
    )
    .increment(1);
}

pub fn record_eviction(projection_name: &str, slice: u16, evicted: usize) {
    if evicted == 0 {
        return;
    }
    metrics::counter!(
        "projection_state_evicted_total",
        "projection" => projection_name.to_string(),
        "slice" => slice.to_string(),
    )
    .increment(evicted as u64);
}

pub fn record_replay_trigger(projection_name: &str) {
    metrics::counter!(
        "projection_replay_triggered_total",
        "projection" => projection_name.to_string(),
    )
    .increment(1);
}

pub fn record_restart(projection_name: &str) {
    metrics::counter!(
        "projection_restarts_total",
        "projection" => projection_name.to_string(),
    )
    .increment(1);
}
