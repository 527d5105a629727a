//! The offset persistence port (spec §4.4), modeled on the teacher's
//! `PersistenceReader`/`RetentionValidator` async-trait port shape
//! (`common/src/persistence.rs`). This crate consumes the port; a concrete
//! backend (SQL, key-value store, ...) is out of scope.

pub mod memory;

use std::time::SystemTime;

use async_trait::async_trait;

use crate::{config::OffsetStoreConfig, record::Record, slice::SliceRange, state::State};

/// One persisted offset row, keyed by `(projection_name, slice, pid)`
/// (spec §6 "Persistence layout").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredOffset {
    pub slice: u16,
    pub pid: String,
    pub seq_nr: u64,
    pub timestamp: SystemTime,
    pub expires_at: Option<SystemTime>,
}

impl StoredOffset {
    pub fn from_record(record: &Record, expires_at: Option<SystemTime>) -> Self {
        Self {
            slice: record.slice,
            pid: record.pid.clone(),
            seq_nr: record.seq_nr,
            timestamp: record.timestamp,
            expires_at,
        }
    }

    pub fn to_record(&self) -> Record {
        Record {
            slice: self.slice,
            pid: self.pid.clone(),
            seq_nr: self.seq_nr,
            timestamp: self.timestamp,
        }
    }
}

/// `{ paused }` (spec §3 "Management state").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagementState {
    pub paused: bool,
}

/// An opaque user-supplied write to commit atomically with an offset
/// (`transactSaveOffset*`, spec §4.4). The store doesn't interpret the
/// payload; it only has to commit it atomically alongside the offset rows.
pub trait TransactionalWrite: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> TransactionalWrite for T {}

#[async_trait]
pub trait OffsetStore<W: TransactionalWrite>: Send + Sync {
    /// Loads persisted offsets for every slice in `range`, merging into a
    /// fresh [`State`]. Spec §4.4: reads happen up to
    /// `offset_slice_read_parallelism` in parallel and are bounded to
    /// `time_window` of each slice's latest timestamp; concrete
    /// implementations are expected to apply that bound when reading, this
    /// port simply returns the merged result.
    async fn load_offsets(
        &self,
        projection_name: &str,
        range: SliceRange,
        config: &OffsetStoreConfig,
    ) -> anyhow::Result<State>;

    async fn save_offset(&self, projection_name: &str, record: &StoredOffset) -> anyhow::Result<()>;

    /// Batched write; each batch is atomic per batch but not across
    /// batches. Callers are expected to chunk into `offset_batch_size`
    /// groups themselves (the driver's commit batcher does this) so a
    /// store implementation only has to guarantee one batch is atomic.
    async fn save_offsets(
        &self,
        projection_name: &str,
        records: &[StoredOffset],
    ) -> anyhow::Result<()>;

    /// Commits `write_items` and `record` in one atomic unit
    /// (`ExactlyOnce`). Fails the whole call on any conflict.
    async fn transact_save_offset(
        &self,
        projection_name: &str,
        write_items: Vec<W>,
        record: &StoredOffset,
    ) -> anyhow::Result<()>;

    async fn transact_save_offsets(
        &self,
        projection_name: &str,
        write_items: Vec<W>,
        records: &[StoredOffset],
    ) -> anyhow::Result<()>;

    async fn read_management_state(&self, projection_name: &str) -> anyhow::Result<ManagementState>;

    async fn save_paused(&self, projection_name: &str, paused: bool) -> anyhow::Result<()>;

    /// Administrative override of a slice's stored offset.
    async fn management_set_offset(
        &self,
        projection_name: &str,
        slice: u16,
        offset: Option<StoredOffset>,
    ) -> anyhow::Result<()>;

    async fn management_clear_offset(&self, projection_name: &str, slice: u16) -> anyhow::Result<()>;

    async fn management_get_offset(
        &self,
        projection_name: &str,
        slice: u16,
    ) -> anyhow::Result<Option<StoredOffset>>;
}
