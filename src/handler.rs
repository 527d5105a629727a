//! The handler strategies (spec §4.5 "Handler strategy"). Grounded in the
//! write-item shape of `database/src/writes.rs` (a transaction produces a
//! description of writes rather than performing them directly, so the
//! driver can commit them atomically with the offset).
//!
//! `Single`/`Grouped`/`Flow` are three distinct contracts, not three names
//! for the same one: `Single` hands the driver one envelope at a time,
//! `Grouped` hands it a whole batch assembled by the driver itself (so the
//! batch's offsets commit as one atomic unit), and `Flow` hands the driver
//! one envelope at a time too but documents that the implementation may be
//! backed by a user-owned streaming pipeline that buffers/reorders
//! internally — the driver only ever sees one element's result at a time,
//! preserving the offset correspondence a real context-carrying flow needs.

use async_trait::async_trait;

use crate::envelope::Envelope;

/// What a handler invocation did, for offset strategies that need a
/// transactional payload (`ExactlyOnce`).
#[derive(Debug, Default, Clone)]
pub struct HandlerOutcome<W> {
    /// User-supplied write items to commit atomically with the offset
    /// record (`ExactlyOnce`/`transactSaveOffset*`). Empty for handlers
    /// that only produced side effects outside the transactional store.
    pub write_items: Vec<W>,
}

impl<W> HandlerOutcome<W> {
    pub fn done() -> Self {
        Self {
            write_items: Vec::new(),
        }
    }

    pub fn with_writes(write_items: Vec<W>) -> Self {
        Self { write_items }
    }
}

/// `Single` (spec §4.5): one envelope in, one [`HandlerOutcome`] out.
#[async_trait]
pub trait Handler<E, W>: Send + Sync {
    async fn handle(&self, envelope: &Envelope<E>) -> anyhow::Result<HandlerOutcome<W>>;
}

/// `Grouped(afterEnvelopes, afterDuration)` (spec §4.5): the driver
/// assembles up to `afterEnvelopes` envelopes (or whatever arrived within
/// `afterDuration`) and invokes this once per group; the group's offsets
/// commit as a single atomic batch regardless of how many envelopes it
/// held.
#[async_trait]
pub trait GroupedHandler<E, W>: Send + Sync {
    async fn process_group(&self, envelopes: &[Envelope<E>]) -> anyhow::Result<HandlerOutcome<W>>;
}

/// `Flow` (spec §4.5): a streaming pipeline with a user transformation.
/// The driver still feeds one envelope at a time and awaits its outcome
/// before committing — exactly as `Single` does — but the method is named
/// distinctly because an implementer is expected to be backed by a
/// user-owned `Stream`/`Sink` pair that may batch, reorder, or parallelize
/// internally; none of that is visible to the driver, which only needs the
/// per-element correspondence between an envelope and its outcome to stay
/// intact.
#[async_trait]
pub trait FlowHandler<E, W>: Send + Sync {
    async fn process_flow_element(&self, envelope: &Envelope<E>) -> anyhow::Result<HandlerOutcome<W>>;
}
