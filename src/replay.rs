//! Replay trigger (spec §4.6): on `RejectedBacktrackingSeqNr`, ask the
//! provider to replay from the stored seq_nr + 1.

use std::sync::Arc;

use crate::{provider::EventSourceProvider, state::State};

/// Best-effort, idempotent: duplicate triggers for the same gap are safe
/// because validation drops re-delivered duplicates (spec §9).
pub struct ReplayTrigger<E> {
    provider: Arc<dyn EventSourceProvider<E>>,
    projection_name: String,
}

impl<E> ReplayTrigger<E> {
    pub fn new(provider: Arc<dyn EventSourceProvider<E>>, projection_name: impl Into<String>) -> Self {
        Self {
            provider,
            projection_name: projection_name.into(),
        }
    }

    /// Triggers a replay for `pid` given the envelope's `seq_nr`, reading
    /// the last stored seq_nr from `state` (defaulting to 0 if unknown).
    /// Only applicable when the provider supports replay and `seq_nr > 1`
    /// (spec §4.6); otherwise this is a no-op.
    pub async fn maybe_trigger(&self, state: &State, pid: &str, seq_nr: u64) -> anyhow::Result<()> {
        if seq_nr <= 1 || !self.provider.supports_replay() {
            return Ok(());
        }
        let stored_seq_nr = state.stored_seq_nr(pid).unwrap_or(0);
        tracing::debug!(
            projection = %self.projection_name,
            pid,
            from_seq_nr = stored_seq_nr + 1,
            triggered_by_seq_nr = seq_nr,
            "triggering replay"
        );
        crate::metrics::record_replay_trigger(&self.projection_name);
        self.provider
            .trigger_replay(pid, stored_seq_nr + 1, seq_nr)
            .await
    }
}
