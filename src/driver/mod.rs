//! The pull-process-commit loop (spec §4.5), parameterized by an offset
//! strategy and a handler strategy. Grounded in `database/src/committer.rs`'s
//! shape: a single task owns `State`, suspends at I/O boundaries, and
//! applies a restart-with-backoff policy on unrecovered failures.

pub mod commit;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use rand::thread_rng;
use tokio::sync::watch;

use self::commit::CommitBatcher;
use crate::{
    backoff::RestartBackoff,
    config::{ProjectionConfig, RecoveryStrategyConfig},
    envelope::{Envelope, Validation},
    errors::ProjectionError,
    handler::{FlowHandler, GroupedHandler, Handler, HandlerOutcome},
    management::ManagementHandle,
    offset::TimestampOffset,
    provider::{EventSourceProvider, FromOffset},
    record::Record,
    replay::ReplayTrigger,
    slice::SliceRange,
    state::State,
    store::{OffsetStore, StoredOffset, TransactionalWrite},
    validator::Validator,
};

/// When the offset is persisted relative to handler success (spec §4.5).
#[derive(Clone, Copy, Debug)]
pub enum OffsetStrategy {
    AtLeastOnce,
    ExactlyOnce,
    AtMostOnce,
    OffsetStoredByHandler,
}

/// Which handler strategy the driver dispatches envelopes through (spec
/// §4.5). `Single`/`Flow` both receive one envelope at a time; `Grouped`
/// receives a whole group assembled by the driver (see `config.grouped`),
/// whose offsets then commit as a single atomic batch.
pub enum HandlerMode<E, W> {
    Single(Arc<dyn Handler<E, W>>),
    Grouped(Arc<dyn GroupedHandler<E, W>>),
    Flow(Arc<dyn FlowHandler<E, W>>),
}

pub struct ProjectionDriver<E, W: TransactionalWrite> {
    name: String,
    stream_id: String,
    slices: SliceRange,
    provider: Arc<dyn EventSourceProvider<E>>,
    store: Arc<dyn OffsetStore<W>>,
    config: ProjectionConfig,
    offset_strategy: OffsetStrategy,
    handler: HandlerMode<E, W>,
    management: ManagementHandle<W>,
}

/// The result of one full (non-restarting) run of the pull loop.
#[derive(Debug)]
enum RunOutcome {
    /// Cooperative `stop()`.
    Stopped,
}

/// One accepted, non-filtered envelope waiting to be handed to a `Grouped`
/// handler as part of the next batch.
struct PendingGroupItem<E> {
    envelope: Envelope<E>,
    record: Record,
}

impl<E: Send + Sync + 'static, W: TransactionalWrite> ProjectionDriver<E, W> {
    pub fn new(
        name: impl Into<String>,
        stream_id: impl Into<String>,
        slices: SliceRange,
        provider: Arc<dyn EventSourceProvider<E>>,
        store: Arc<dyn OffsetStore<W>>,
        config: ProjectionConfig,
        offset_strategy: OffsetStrategy,
        handler: HandlerMode<E, W>,
    ) -> Result<Self, ProjectionError> {
        if matches!(offset_strategy, OffsetStrategy::AtMostOnce)
            && !config.recovery_strategy.compatible_with_at_most_once()
        {
            return Err(ProjectionError::InvalidConfiguration(
                "AtMostOnce only permits fail|skip recovery strategies".to_string(),
            ));
        }
        if matches!(offset_strategy, OffsetStrategy::AtMostOnce) && matches!(handler, HandlerMode::Grouped(_)) {
            return Err(ProjectionError::InvalidConfiguration(
                "AtMostOnce cannot be paired with Grouped: the offset must persist before the \
                 handler runs, but Grouped defers the handler until a batch is assembled"
                    .to_string(),
            ));
        }
        let name = name.into();
        let management = ManagementHandle::new(store.clone(), name.clone(), config.management, false);
        Ok(Self {
            name,
            stream_id: stream_id.into(),
            slices,
            provider,
            store,
            config,
            offset_strategy,
            handler,
            management,
        })
    }

    pub fn management(&self) -> ManagementHandle<W> {
        self.management.clone()
    }

    /// Runs until `stop_rx` fires, applying restart-with-backoff around
    /// `run_once` on stream-fatal errors (spec §4.5 "Restart-with-backoff").
    pub async fn run(&self, mut stop_rx: watch::Receiver<bool>) {
        let mut backoff = RestartBackoff::new(
            self.config.restart_backoff.min_backoff,
            self.config.restart_backoff.max_backoff,
            self.config.restart_backoff.random_factor,
            self.config.restart_backoff.max_restarts,
        );
        let mut rng = thread_rng();

        loop {
            if *stop_rx.borrow() {
                return;
            }
            let result = self.run_once(&mut stop_rx).await;
            match result {
                Ok(RunOutcome::Stopped) => return,
                Err(e) => {
                    tracing::error!(projection = %self.name, error = %e, "projection stream failed");
                    crate::metrics::record_restart(&self.name);
                    if backoff.restarts_exhausted() {
                        tracing::error!(projection = %self.name, "restarts exhausted, giving up");
                        return;
                    }
                    let delay = backoff.next_delay(&mut rng);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = stop_rx.changed() => { if *stop_rx.borrow() { return; } }
                    }
                },
            }
        }
    }

    /// Re-reads offsets from the store and reconstructs in-memory `State`
    /// before pulling, per spec §4.5 "Restart re-reads offsets ... State is
    /// reconstructed". Also re-seeds the management pause state from the
    /// store (spec §3/§4.7: `paused` is durable), so a process that
    /// restarted while paused doesn't silently resume consuming events.
    async fn run_once(&self, stop_rx: &mut watch::Receiver<bool>) -> anyhow::Result<RunOutcome> {
        let persisted_management = self.store.read_management_state(&self.name).await?;
        self.management.sync_paused_from_store(persisted_management.paused);

        let mut state = self
            .store
            .load_offsets(&self.name, self.slices, &self.config.offset_store)
            .await?;
        let mut validator = Validator::new();
        let replay_trigger = ReplayTrigger::new(self.provider.clone(), self.name.clone());

        let offsets: std::collections::BTreeMap<u16, TimestampOffset> = self
            .slices
            .iter()
            .filter_map(|s| state.offset_by_slice(s).map(|o| (s, o)))
            .collect();
        let from_offset = if offsets.is_empty() {
            FromOffset::Beginning
        } else {
            FromOffset::Offsets(offsets)
        };

        let mut stream = self
            .provider
            .events_by_slices(&self.stream_id, self.slices, from_offset);

        let mut batcher = CommitBatcher::new(
            self.config.at_least_once.save_offset_after_envelopes,
            self.config.at_least_once.save_offset_after_duration,
        );
        let mut group_buffer: Vec<PendingGroupItem<E>> = Vec::new();
        let mut last_group_flush = Instant::now();
        let mut last_evict = Instant::now();
        let mut paused_rx = self.management.paused_watch();

        loop {
            // Pause halts consumption at the pull point without tearing
            // down the stream (spec §4.7).
            while *paused_rx.borrow() {
                tokio::select! {
                    _ = paused_rx.changed() => {},
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return Ok(RunOutcome::Stopped);
                        }
                    }
                }
            }

            let envelope = tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        if !batcher.is_empty() {
                            self.flush(&mut batcher).await?;
                        }
                        self.flush_group(&mut state, &mut validator, &mut group_buffer).await?;
                        return Ok(RunOutcome::Stopped);
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            let Some(envelope) = envelope else {
                // Provider's stream ended; nothing left to pull.
                if !batcher.is_empty() {
                    self.flush(&mut batcher).await?;
                }
                self.flush_group(&mut state, &mut validator, &mut group_buffer).await?;
                return Ok(RunOutcome::Stopped);
            };
            let envelope = envelope?;

            self.handle_envelope(
                &mut state,
                &mut validator,
                &replay_trigger,
                &mut batcher,
                &mut group_buffer,
                envelope,
            )
            .await?;

            if batcher.should_flush() {
                self.flush(&mut batcher).await?;
            }
            if self.group_should_flush(&group_buffer, last_group_flush) {
                self.flush_group(&mut state, &mut validator, &mut group_buffer).await?;
                last_group_flush = Instant::now();
            }

            if last_evict.elapsed() >= self.config.offset_store.evict_interval
                && state.total_len() > self.config.offset_store.keep_number_of_entries
            {
                for s in self.slices.iter() {
                    let evicted = state.evict(s, self.config.offset_store.time_window);
                    crate::metrics::record_eviction(&self.name, s, evicted);
                }
                last_evict = Instant::now();
            }
        }
    }

    fn group_should_flush(&self, group_buffer: &[PendingGroupItem<E>], last_group_flush: Instant) -> bool {
        if group_buffer.is_empty() {
            return false;
        }
        group_buffer.len() as u32 >= self.config.grouped.group_after_envelopes
            || last_group_flush.elapsed() >= self.config.grouped.group_after_duration
    }

    async fn handle_envelope(
        &self,
        state: &mut State,
        validator: &mut Validator,
        replay_trigger: &ReplayTrigger<E>,
        batcher: &mut CommitBatcher,
        group_buffer: &mut Vec<PendingGroupItem<E>>,
        mut envelope: Envelope<E>,
    ) -> anyhow::Result<()> {
        let classification = validator.validate(state, &envelope);
        crate::metrics::record_validation(&self.name, &classification);

        match classification {
            Validation::Duplicate => Ok(()),

            Validation::RejectedSeqNr { .. } => {
                tracing::warn!(projection = %self.name, pid = %envelope.pid, seq_nr = envelope.seq_nr, "rejected seq_nr, awaiting live delivery");
                let _ = replay_trigger
                    .maybe_trigger(state, &envelope.pid, envelope.seq_nr)
                    .await;
                Ok(())
            },

            Validation::RejectedBacktrackingSeqNr { expected_next, got } => {
                let triggered = replay_trigger
                    .maybe_trigger(state, &envelope.pid, envelope.seq_nr)
                    .await;
                if self.provider.supports_replay() && triggered.is_ok() {
                    Ok(())
                } else {
                    Err(ProjectionError::RejectedEnvelope {
                        pid: envelope.pid.clone(),
                        expected_next,
                        got,
                    }
                    .into())
                }
            },

            Validation::Accepted => {
                let record = validator.record_for(&envelope);

                if envelope.filtered {
                    // Filter must not stall progress: advance the offset,
                    // skip the handler (spec §4.5).
                    state.add([record.clone()]);
                    validator.mark_committed(&envelope.pid, envelope.seq_nr);
                    self.commit_record(batcher, record).await?;
                    return Ok(());
                }

                if envelope.needs_load() {
                    envelope = self.provider.load_envelope(&envelope.pid, envelope.seq_nr).await?;
                }

                if matches!(self.handler, HandlerMode::Grouped(_)) {
                    group_buffer.push(PendingGroupItem { envelope, record });
                    return Ok(());
                }

                match self.offset_strategy {
                    OffsetStrategy::AtMostOnce => {
                        // Commit synchronously *before* invoking the
                        // handler — not via the batcher, which would defer
                        // the actual write and let the handler run ahead
                        // of a durable commit. A handler failure after this
                        // point loses the event, which is why only
                        // fail|skip recovery is permitted (enforced at
                        // construction).
                        let stored = StoredOffset::from_record(&record, self.expires_at());
                        self.store.save_offset(&self.name, &stored).await.map_err(|e| {
                            ProjectionError::OffsetCommitFailure {
                                attempts: 1,
                                reason: e.to_string(),
                            }
                        })?;
                        state.add([record]);
                        validator.mark_committed(&envelope.pid, envelope.seq_nr);
                        if let Err(e) = self.dispatch_single(&envelope).await {
                            self.apply_recovery_strategy_no_retry(&envelope, e)?;
                        }
                        Ok(())
                    },

                    OffsetStrategy::ExactlyOnce => {
                        let outcome = self
                            .run_with_recovery(&envelope.pid, envelope.seq_nr, || self.dispatch_single(&envelope))
                            .await?;
                        let Some(outcome) = outcome else {
                            // Skipped: still commit forward, no write items.
                            state.add([record.clone()]);
                            validator.mark_committed(&envelope.pid, envelope.seq_nr);
                            self.commit_record(batcher, record).await?;
                            return Ok(());
                        };
                        let stored = StoredOffset::from_record(&record, self.expires_at());
                        self.store
                            .transact_save_offset(&self.name, outcome.write_items, &stored)
                            .await
                            .map_err(|e| ProjectionError::OffsetCommitFailure {
                                attempts: 1,
                                reason: e.to_string(),
                            })?;
                        state.add([record]);
                        validator.mark_committed(&envelope.pid, envelope.seq_nr);
                        Ok(())
                    },

                    OffsetStrategy::AtLeastOnce => {
                        // Commit forward regardless of whether the handler
                        // ran or was skipped — a `skip` recovery discards
                        // the offending element but must not block future
                        // delivery of the same pid (spec §4.5).
                        let _outcome = self
                            .run_with_recovery(&envelope.pid, envelope.seq_nr, || self.dispatch_single(&envelope))
                            .await?;
                        state.add([record.clone()]);
                        validator.mark_committed(&envelope.pid, envelope.seq_nr);
                        self.commit_record(batcher, record).await?;
                        Ok(())
                    },

                    OffsetStrategy::OffsetStoredByHandler => {
                        // The handler is responsible for persisting the
                        // offset itself; the driver only keeps its local
                        // in-memory State consistent for dedup purposes.
                        self.run_with_recovery(&envelope.pid, envelope.seq_nr, || self.dispatch_single(&envelope))
                            .await?;
                        state.add([record]);
                        validator.mark_committed(&envelope.pid, envelope.seq_nr);
                        Ok(())
                    },
                }
            },
        }
    }

    /// Invokes the handler for one envelope. Valid only when `self.handler`
    /// is `Single` or `Flow` — `Grouped` envelopes never reach this path,
    /// they're buffered and dispatched via `flush_group` instead.
    async fn dispatch_single(&self, envelope: &Envelope<E>) -> anyhow::Result<HandlerOutcome<W>> {
        match &self.handler {
            HandlerMode::Single(h) => h.handle(envelope).await,
            HandlerMode::Flow(h) => h.process_flow_element(envelope).await,
            HandlerMode::Grouped(_) => {
                unreachable!("grouped envelopes are buffered, not dispatched individually")
            },
        }
    }

    /// Invokes the `Grouped` handler on whatever is buffered and commits
    /// the group's offsets as one atomic unit, then clears the buffer.
    /// No-op if the buffer is empty.
    async fn flush_group(
        &self,
        state: &mut State,
        validator: &mut Validator,
        group_buffer: &mut Vec<PendingGroupItem<E>>,
    ) -> anyhow::Result<()> {
        if group_buffer.is_empty() {
            return Ok(());
        }
        let HandlerMode::Grouped(grouped_handler) = &self.handler else {
            unreachable!("flush_group only called in Grouped handler mode");
        };

        let items = std::mem::take(group_buffer);
        let mut envelopes = Vec::with_capacity(items.len());
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            envelopes.push(item.envelope);
            records.push(item.record);
        }
        let last = envelopes.last().expect("checked non-empty above");
        let (last_pid, last_seq_nr) = (last.pid.clone(), last.seq_nr);

        let outcome = self
            .run_with_recovery(&last_pid, last_seq_nr, || grouped_handler.process_group(&envelopes))
            .await?;

        for (envelope, record) in envelopes.iter().zip(records.iter()) {
            state.add([record.clone()]);
            validator.mark_committed(&envelope.pid, envelope.seq_nr);
        }

        let Some(outcome) = outcome else {
            // Skipped: commit the whole group's offsets forward anyway.
            return self.commit_group(&records).await;
        };

        match self.offset_strategy {
            OffsetStrategy::ExactlyOnce => {
                let stored: Vec<StoredOffset> = records
                    .iter()
                    .map(|r| StoredOffset::from_record(r, self.expires_at()))
                    .collect();
                self.store
                    .transact_save_offsets(&self.name, outcome.write_items, &stored)
                    .await
                    .map_err(|e| ProjectionError::OffsetCommitFailure {
                        attempts: 1,
                        reason: e.to_string(),
                    })?;
                Ok(())
            },
            OffsetStrategy::AtLeastOnce => self.commit_group(&records).await,
            OffsetStrategy::OffsetStoredByHandler => Ok(()),
            OffsetStrategy::AtMostOnce => {
                unreachable!("AtMostOnce+Grouped is rejected at construction")
            },
        }
    }

    async fn commit_group(&self, records: &[Record]) -> anyhow::Result<()> {
        let stored: Vec<StoredOffset> = records
            .iter()
            .map(|r| StoredOffset::from_record(r, self.expires_at()))
            .collect();
        self.store
            .save_offsets(&self.name, &stored)
            .await
            .map_err(|e| ProjectionError::OffsetCommitFailure {
                attempts: 1,
                reason: e.to_string(),
            })?;
        if let Some(first) = stored.first() {
            crate::metrics::record_commit_batch(&self.name, first.slice, stored.len());
        }
        Ok(())
    }

    fn expires_at(&self) -> Option<std::time::SystemTime> {
        self.config
            .time_to_live
            .ttl_for(&self.name)
            .map(|ttl| std::time::SystemTime::now() + ttl)
    }

    async fn commit_record(&self, batcher: &mut CommitBatcher, record: Record) -> anyhow::Result<()> {
        batcher.push(StoredOffset::from_record(&record, self.expires_at()));
        Ok(())
    }

    async fn flush(&self, batcher: &mut CommitBatcher) -> anyhow::Result<()> {
        let pending = batcher.drain();
        if pending.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        for chunk in pending.chunks(self.config.offset_store.offset_batch_size) {
            self.store
                .save_offsets(&self.name, chunk)
                .await
                .map_err(|e| ProjectionError::OffsetCommitFailure {
                    attempts: 1,
                    reason: e.to_string(),
                })?;
            crate::metrics::record_commit_batch(&self.name, chunk[0].slice, chunk.len());
        }
        crate::metrics::record_commit_latency(&self.name, started.elapsed());
        Ok(())
    }

    /// Runs `call` applying `recovery_strategy`. Returns `Ok(None)` if the
    /// recovery strategy decided to skip the unit of work (envelope or
    /// group) — the caller must still commit its offset(s) forward;
    /// `Ok(Some(outcome))` on success; propagates a stream-fatal error only
    /// when the strategy is `fail`/`retryAndFail` and exhausted. Shared
    /// between single-envelope dispatch and group dispatch so both get
    /// identical fail/skip/retry semantics (spec §4.5).
    async fn run_with_recovery<F, Fut>(
        &self,
        pid: &str,
        seq_nr: u64,
        call: F,
    ) -> anyhow::Result<Option<HandlerOutcome<W>>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<HandlerOutcome<W>>>,
    {
        match self.config.recovery_strategy {
            RecoveryStrategyConfig::Fail => Ok(Some(call().await.map_err(|e| ProjectionError::HandlerFailure {
                pid: pid.to_string(),
                seq_nr,
                reason: e.to_string(),
            })?)),
            RecoveryStrategyConfig::Skip => match call().await {
                Ok(o) => Ok(Some(o)),
                Err(e) => {
                    tracing::warn!(projection = %self.name, pid, error = %e, "handler failed, skipping");
                    Ok(None)
                },
            },
            RecoveryStrategyConfig::RetryAndFail { retries, retry_delay } => {
                self.retry_loop(pid, seq_nr, retries, retry_delay, false, call).await
            },
            RecoveryStrategyConfig::RetryAndSkip { retries, retry_delay } => {
                self.retry_loop(pid, seq_nr, retries, retry_delay, true, call).await
            },
        }
    }

    async fn retry_loop<F, Fut>(
        &self,
        pid: &str,
        seq_nr: u64,
        retries: u32,
        retry_delay: Duration,
        skip_on_exhaustion: bool,
        call: F,
    ) -> anyhow::Result<Option<HandlerOutcome<W>>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<HandlerOutcome<W>>>,
    {
        let mut attempt = 0u32;
        let mut delay = retry_delay;
        loop {
            match call().await {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(projection = %self.name, pid, attempt, error = %e, "handler failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, retry_delay * 16);
                },
                Err(e) => {
                    if skip_on_exhaustion {
                        tracing::warn!(projection = %self.name, pid, error = %e, "retries exhausted, skipping");
                        return Ok(None);
                    }
                    return Err(ProjectionError::HandlerFailure {
                        pid: pid.to_string(),
                        seq_nr,
                        reason: e.to_string(),
                    }
                    .into());
                },
            }
        }
    }

    fn apply_recovery_strategy_no_retry(
        &self,
        envelope: &Envelope<E>,
        error: anyhow::Error,
    ) -> anyhow::Result<()> {
        match self.config.recovery_strategy {
            RecoveryStrategyConfig::Skip => {
                tracing::warn!(projection = %self.name, pid = %envelope.pid, error = %error, "AtMostOnce handler failed, skipping (offset already committed)");
                Ok(())
            },
            RecoveryStrategyConfig::Fail => Err(ProjectionError::HandlerFailure {
                pid: envelope.pid.clone(),
                seq_nr: envelope.seq_nr,
                reason: error.to_string(),
            }
            .into()),
            // Unreachable: construction rejects retry* with AtMostOnce.
            _ => unreachable!("AtMostOnce only permits fail|skip, enforced at construction"),
        }
    }
}
