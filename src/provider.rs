//! The event source provider port consumed by the driver (spec §1, §6).
//! This crate only consumes this interface; concrete implementations
//! (database-backed, transport-backed, ...) are out of scope.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{envelope::Envelope, offset::TimestampOffset, slice::SliceRange};

/// A starting point for `events_by_slices`: either the beginning of the
/// stream, or a per-slice map of previously-persisted [`TimestampOffset`]s
/// (a slice with no entry resumes from the beginning).
#[derive(Clone, Debug)]
pub enum FromOffset {
    Beginning,
    Offsets(BTreeMap<u16, TimestampOffset>),
}

#[async_trait]
pub trait EventSourceProvider<E>: Send + Sync {
    /// Streams envelopes for pids whose slice falls in `slices`, resuming
    /// from `from_offset`.
    fn events_by_slices(
        &self,
        stream_id: &str,
        slices: SliceRange,
        from_offset: FromOffset,
    ) -> BoxStream<'static, anyhow::Result<Envelope<E>>>;

    /// Loads the full event for a placeholder envelope delivered via the
    /// backtracking stream (`Envelope::needs_load`).
    async fn load_envelope(&self, pid: &str, seq_nr: u64) -> anyhow::Result<Envelope<E>>;

    /// Whether [`EventSourceProvider::trigger_replay`] is supported. The
    /// driver must check this before relying on it for
    /// `RejectedBacktrackingSeqNr` recovery (spec §4.6).
    fn supports_replay(&self) -> bool {
        false
    }

    /// Requests replay of `pid`'s events starting at `from_seq_nr`, because
    /// `triggered_by_seq_nr` was observed without the intervening events.
    /// No-op default for providers that don't support replay;
    /// [`EventSourceProvider::supports_replay`] should return `false` in
    /// that case so the driver doesn't depend on it.
    async fn trigger_replay(
        &self,
        _pid: &str,
        _from_seq_nr: u64,
        _triggered_by_seq_nr: u64,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
