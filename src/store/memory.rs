//! An in-memory reference `OffsetStore`, used by `tests/driver_integration.rs`
//! and shipped in the default build for embedders wanting a quick start —
//! grounded in the teacher's `TestPersistence` (an in-memory stand-in for
//! the real backend used throughout `database`'s own test suite).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    config::OffsetStoreConfig,
    record::Record,
    slice::SliceRange,
    state::State,
    store::{ManagementState, OffsetStore, StoredOffset, TransactionalWrite},
};

type RowKey = (String, u16, String);

#[derive(Default)]
struct Inner<W> {
    rows: HashMap<RowKey, StoredOffset>,
    management: HashMap<String, ManagementState>,
    applied_writes: Vec<W>,
}

/// An in-memory `OffsetStore` backed by a single `Mutex`. Rows are keyed by
/// `(projection_name, slice, pid)` (spec §6 "Persistence layout") so that
/// one store instance can be shared across differently-named projections
/// without their offsets colliding (spec §5). TTL is honored on read:
/// expired rows are filtered out rather than relied upon to vanish,
/// matching spec §4.4's requirement that the core never depend on reading
/// already-expired records.
pub struct InMemoryOffsetStore<W> {
    inner: Mutex<Inner<W>>,
    now: Box<dyn Fn() -> SystemTime + Send + Sync>,
    save_offsets_calls: AtomicU32,
}

impl<W: TransactionalWrite> InMemoryOffsetStore<W> {
    pub fn new() -> Self {
        Self::with_clock(SystemTime::now)
    }

    /// Constructs a store with an injectable clock, so tests can control
    /// TTL expiry deterministically without real sleeping.
    pub fn with_clock(now: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            now: Box::new(now),
            save_offsets_calls: AtomicU32::new(0),
        }
    }

    pub fn save_offsets_call_count(&self) -> u32 {
        self.save_offsets_calls.load(Ordering::SeqCst)
    }

    pub fn applied_write_count(&self) -> usize {
        self.inner.lock().applied_writes.len()
    }

    fn is_live(&self, row: &StoredOffset) -> bool {
        match row.expires_at {
            Some(exp) => exp > (self.now)(),
            None => true,
        }
    }

    fn key(projection_name: &str, slice: u16, pid: &str) -> RowKey {
        (projection_name.to_string(), slice, pid.to_string())
    }
}

impl<W: TransactionalWrite> Default for InMemoryOffsetStore<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<W: TransactionalWrite> OffsetStore<W> for InMemoryOffsetStore<W> {
    async fn load_offsets(
        &self,
        projection_name: &str,
        range: SliceRange,
        config: &OffsetStoreConfig,
    ) -> anyhow::Result<State> {
        let inner = self.inner.lock();
        let mut state = State::empty();
        for ((name, slice, _pid), row) in inner.rows.iter() {
            if name != projection_name || !range.contains(*slice) || !self.is_live(row) {
                continue;
            }
            state.add([row.to_record()]);
        }
        // Apply the same bounded-retention read the real backend would:
        // only the most recent `time_window` per slice is meaningful.
        for slice in range.iter() {
            state.evict(slice, config.time_window);
        }
        Ok(state)
    }

    async fn save_offset(&self, projection_name: &str, record: &StoredOffset) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner
            .rows
            .insert(Self::key(projection_name, record.slice, &record.pid), record.clone());
        Ok(())
    }

    async fn save_offsets(&self, projection_name: &str, records: &[StoredOffset]) -> anyhow::Result<()> {
        self.save_offsets_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        for r in records {
            inner
                .rows
                .insert(Self::key(projection_name, r.slice, &r.pid), r.clone());
        }
        Ok(())
    }

    async fn transact_save_offset(
        &self,
        projection_name: &str,
        write_items: Vec<W>,
        record: &StoredOffset,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.applied_writes.extend(write_items);
        inner
            .rows
            .insert(Self::key(projection_name, record.slice, &record.pid), record.clone());
        Ok(())
    }

    async fn transact_save_offsets(
        &self,
        projection_name: &str,
        write_items: Vec<W>,
        records: &[StoredOffset],
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.applied_writes.extend(write_items);
        for r in records {
            inner
                .rows
                .insert(Self::key(projection_name, r.slice, &r.pid), r.clone());
        }
        Ok(())
    }

    async fn read_management_state(&self, projection_name: &str) -> anyhow::Result<ManagementState> {
        Ok(self
            .inner
            .lock()
            .management
            .get(projection_name)
            .copied()
            .unwrap_or_default())
    }

    async fn save_paused(&self, projection_name: &str, paused: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner
            .management
            .entry(projection_name.to_string())
            .or_default()
            .paused = paused;
        Ok(())
    }

    async fn management_set_offset(
        &self,
        projection_name: &str,
        slice: u16,
        offset: Option<StoredOffset>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        match offset {
            Some(row) => {
                inner
                    .rows
                    .insert(Self::key(projection_name, slice, &row.pid), row);
            },
            None => {
                let projection_name = projection_name.to_string();
                inner
                    .rows
                    .retain(|(name, s, _), _| !(*name == projection_name && *s == slice));
            },
        }
        Ok(())
    }

    async fn management_clear_offset(&self, projection_name: &str, slice: u16) -> anyhow::Result<()> {
        self.management_set_offset(projection_name, slice, None).await
    }

    async fn management_get_offset(
        &self,
        projection_name: &str,
        slice: u16,
    ) -> anyhow::Result<Option<StoredOffset>> {
        let inner = self.inner.lock();
        Ok(inner
            .rows
            .iter()
            .filter(|((name, s, _), r)| name == projection_name && *s == slice && self.is_live(r))
            .map(|(_, r)| r)
            .max_by_key(|r| (r.timestamp, r.seq_nr))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let store: InMemoryOffsetStore<()> = InMemoryOffsetStore::new();
        let record = Record::new("p1", 3, SystemTime::UNIX_EPOCH);
        store
            .save_offset("proj", &StoredOffset::from_record(&record, None))
            .await
            .unwrap();

        let state = store
            .load_offsets("proj", SliceRange::full(), &OffsetStoreConfig::default())
            .await
            .unwrap();
        assert_eq!(state.stored_seq_nr("p1"), Some(3));
    }

    #[tokio::test]
    async fn expired_rows_are_excluded_from_load() {
        let store: InMemoryOffsetStore<()> =
            InMemoryOffsetStore::with_clock(|| SystemTime::UNIX_EPOCH + Duration::from_secs(100));
        let record = Record::new("p1", 1, SystemTime::UNIX_EPOCH);
        let expires_at = SystemTime::UNIX_EPOCH + Duration::from_secs(50);
        store
            .save_offset("proj", &StoredOffset::from_record(&record, Some(expires_at)))
            .await
            .unwrap();

        let state = store
            .load_offsets("proj", SliceRange::full(), &OffsetStoreConfig::default())
            .await
            .unwrap();
        assert_eq!(state.stored_seq_nr("p1"), None);
    }

    #[tokio::test]
    async fn transact_save_offset_applies_writes_and_offset_together() {
        let store: InMemoryOffsetStore<String> = InMemoryOffsetStore::new();
        let record = Record::new("p1", 1, SystemTime::UNIX_EPOCH);
        store
            .transact_save_offset(
                "proj",
                vec!["write-1".to_string()],
                &StoredOffset::from_record(&record, None),
            )
            .await
            .unwrap();
        assert_eq!(store.applied_write_count(), 1);
        assert_eq!(
            store.management_get_offset("proj", record.slice).await.unwrap(),
            Some(StoredOffset::from_record(&record, None))
        );
    }

    // Spec §5: "the offset store may be shared across projection instances
    // in the same process" — two differently-named projections writing to
    // the same slice/pid must not clobber each other's rows.
    #[tokio::test]
    async fn rows_are_isolated_per_projection_name() {
        let store: InMemoryOffsetStore<()> = InMemoryOffsetStore::new();
        let record = Record::new("p1", 1, SystemTime::UNIX_EPOCH);
        store
            .save_offset("proj-a", &StoredOffset::from_record(&record, None))
            .await
            .unwrap();
        let record2 = Record::new("p1", 9, SystemTime::UNIX_EPOCH);
        store
            .save_offset("proj-b", &StoredOffset::from_record(&record2, None))
            .await
            .unwrap();

        assert_eq!(
            store
                .management_get_offset("proj-a", record.slice)
                .await
                .unwrap()
                .map(|o| o.seq_nr),
            Some(1)
        );
        assert_eq!(
            store
                .management_get_offset("proj-b", record.slice)
                .await
                .unwrap()
                .map(|o| o.seq_nr),
            Some(9)
        );

        store.management_clear_offset("proj-a", record.slice).await.unwrap();
        assert_eq!(
            store
                .management_get_offset("proj-a", record.slice)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .management_get_offset("proj-b", record.slice)
                .await
                .unwrap()
                .map(|o| o.seq_nr),
            Some(9)
        );
    }
}
