//! Typed errors surfaced by this crate, in the spirit of the teacher's
//! `ErrorMetadata` (`crates/errors/src/lib.rs`): every variant carries a
//! short, stable tag suitable for metrics labels and test assertions, plus
//! a human-readable message.

use std::time::Duration;

use thiserror::Error;

/// Errors the projection driver and its collaborators can raise. See spec
/// §7 for the behavior each variant triggers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// The user handler failed and the configured [`crate::driver::RecoveryStrategy`]
    /// gave up (`fail`, or `retryAndFail` after exhausting retries).
    #[error("handler failed for pid {pid} seq_nr {seq_nr}: {reason}")]
    HandlerFailure {
        pid: String,
        seq_nr: u64,
        reason: String,
    },

    /// Persisting an offset batch failed after retries; this is always
    /// surfaced (never silently skipped) because offsets are
    /// correctness-critical.
    #[error("offset commit failed after {attempts} attempts: {reason}")]
    OffsetCommitFailure { attempts: u32, reason: String },

    /// A backtracking-stream gap could not be closed by replay (the
    /// provider does not support replay, or replay itself failed).
    #[error("rejected backtracking seq_nr for pid {pid}: expected <= {expected_next}, got {got}")]
    RejectedEnvelope {
        pid: String,
        expected_next: u64,
        got: u64,
    },

    /// Raised internally to abandon an in-progress handler retry wait when
    /// `stop()` is requested (the teacher's `AbortProjectionException`).
    #[error("projection stopped while retrying pid {pid}")]
    Aborted { pid: String },

    /// A [`crate::config::ProjectionConfig`] value violates an invariant
    /// (e.g. `AtMostOnce` paired with a `retry*` recovery strategy), or a
    /// management operation was attempted outside its allowed state (e.g.
    /// `clearOffset` while not paused).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A management RPC exceeded its timeout budget.
    #[error("management operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ProjectionError {
    /// Stable tag for metrics/tests, mirroring `ErrorMetadata::short_msg`.
    pub fn short_msg(&self) -> &'static str {
        match self {
            ProjectionError::HandlerFailure { .. } => "HandlerFailure",
            ProjectionError::OffsetCommitFailure { .. } => "OffsetCommitFailure",
            ProjectionError::RejectedEnvelope { .. } => "RejectedEnvelope",
            ProjectionError::Aborted { .. } => "Aborted",
            ProjectionError::InvalidConfiguration(_) => "InvalidConfiguration",
            ProjectionError::Timeout(_) => "Timeout",
        }
    }

    /// Whether the driver should restart the stream on this error (state
    /// integrity errors) as opposed to applying the handler recovery
    /// strategy locally.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            ProjectionError::OffsetCommitFailure { .. } | ProjectionError::RejectedEnvelope { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_msg_is_stable() {
        let e = ProjectionError::RejectedEnvelope {
            pid: "p1".into(),
            expected_next: 4,
            got: 7,
        };
        assert_eq!(e.short_msg(), "RejectedEnvelope");
    }

    #[test]
    fn stream_fatal_classification() {
        assert!(ProjectionError::OffsetCommitFailure {
            attempts: 3,
            reason: "x".into()
        }
        .is_stream_fatal());
        assert!(!ProjectionError::HandlerFailure {
            pid: "p1".into(),
            seq_nr: 1,
            reason: "x".into()
        }
        .is_stream_fatal());
    }
}
