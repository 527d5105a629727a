//! Management surface (spec §4.7): pause/resume, offset inspection/
//! override, clear. Backed by the offset store; `paused` is additionally
//! broadcast locally via a `watch` channel so the driver's pull loop can
//! react without an extra round trip, mirroring the teacher's
//! `subscription.rs` use of `tokio::sync::watch` for validity broadcast.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::timeout};

use crate::{
    config::ManagementConfig,
    errors::ProjectionError,
    store::{ManagementState, OffsetStore, StoredOffset, TransactionalWrite},
};

/// Shared handle the driver and any number of management-API callers hold.
/// Cloning is cheap (`Arc` underneath); all clones observe the same paused
/// state and talk to the same backing store.
#[derive(Clone)]
pub struct ManagementHandle<W: TransactionalWrite> {
    store: Arc<dyn OffsetStore<W>>,
    projection_name: String,
    config: ManagementConfig,
    paused_tx: Arc<watch::Sender<bool>>,
    paused_rx: watch::Receiver<bool>,
}

impl<W: TransactionalWrite> ManagementHandle<W> {
    pub fn new(
        store: Arc<dyn OffsetStore<W>>,
        projection_name: impl Into<String>,
        config: ManagementConfig,
        initially_paused: bool,
    ) -> Self {
        let (paused_tx, paused_rx) = watch::channel(initially_paused);
        Self {
            store,
            projection_name: projection_name.into(),
            config,
            paused_tx: Arc::new(paused_tx),
            paused_rx,
        }
    }

    /// A receiver the driver's pull loop can poll/await to react to pause
    /// changes without hitting the store on every iteration.
    pub fn paused_watch(&self) -> watch::Receiver<bool> {
        self.paused_rx.clone()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused_rx.borrow()
    }

    /// Seeds the local watch channel from a management state just read back
    /// from the store, without writing anything — used by
    /// `ProjectionDriver::run_once` on every (re)start so a process that
    /// restarted while paused doesn't silently resume consuming events
    /// (spec §3/§4.7).
    pub(crate) fn sync_paused_from_store(&self, paused: bool) {
        let _ = self.paused_tx.send(paused);
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ProjectionError> {
        match timeout(self.config.operation_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ProjectionError::InvalidConfiguration(e.to_string())),
            Err(_) => Err(ProjectionError::Timeout(self.config.operation_timeout)),
        }
    }

    pub async fn get_management_state(&self) -> Result<ManagementState, ProjectionError> {
        self.with_timeout(self.store.read_management_state(&self.projection_name))
            .await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), ProjectionError> {
        self.with_timeout(self.store.save_paused(&self.projection_name, paused))
            .await?;
        let _ = self.paused_tx.send(paused);
        tracing::info!(projection = %self.projection_name, paused, "management: set_paused");
        Ok(())
    }

    pub async fn get_offset(&self, slice: u16) -> Result<Option<StoredOffset>, ProjectionError> {
        self.with_timeout(self.store.management_get_offset(&self.projection_name, slice))
            .await
    }

    pub async fn set_offset(
        &self,
        slice: u16,
        offset: Option<StoredOffset>,
    ) -> Result<(), ProjectionError> {
        self.with_timeout(
            self.store
                .management_set_offset(&self.projection_name, slice, offset),
        )
        .await?;
        tracing::info!(projection = %self.projection_name, slice, "management: set_offset");
        Ok(())
    }

    /// Clears the stored offset for `slice`. Spec §9's open question on
    /// `setOffset(None)` while live consumption is ongoing is resolved
    /// here by requiring the projection to be paused first; if the
    /// instance currently reports `!paused`, the operation is rejected
    /// rather than racing the live stream (see DESIGN.md).
    pub async fn clear_offset(&self, slice: u16) -> Result<(), ProjectionError> {
        if !self.is_paused() {
            return Err(ProjectionError::InvalidConfiguration(
                "clear_offset requires the projection to be paused".to_string(),
            ));
        }
        self.with_timeout(self.store.management_clear_offset(&self.projection_name, slice))
            .await?;
        tracing::info!(projection = %self.projection_name, slice, "management: clear_offset");
        Ok(())
    }

    pub fn ask_timeout(&self) -> Duration {
        self.config.ask_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryOffsetStore;

    fn handle(paused: bool) -> ManagementHandle<()> {
        let store: Arc<dyn OffsetStore<()>> = Arc::new(InMemoryOffsetStore::new());
        ManagementHandle::new(store, "proj", ManagementConfig::default(), paused)
    }

    #[tokio::test]
    async fn set_paused_updates_both_store_and_watch() {
        let h = handle(false);
        assert!(!h.is_paused());
        h.set_paused(true).await.unwrap();
        assert!(h.is_paused());
        assert!(h.get_management_state().await.unwrap().paused);
    }

    #[tokio::test]
    async fn clear_offset_rejected_while_not_paused() {
        let h = handle(false);
        let err = h.clear_offset(0).await.unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn clear_offset_allowed_while_paused() {
        let h = handle(true);
        h.clear_offset(0).await.unwrap();
    }
}
