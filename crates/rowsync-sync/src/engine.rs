//! Synchronization engine running delivery passes.
//!
//! A pass opens one store transaction, selects the eligible batch, delivers
//! every record in order and writes its outcome, then commits. Delivery
//! failures stay local to their record; store faults before the commit roll
//! the pass back.
//!
//! ```text
//! begin ─▶ select (group A, group B) ─▶ for each record:
//!                                          POST ─▶ classify ─▶ update
//!       ─▶ commit ─▶ Continue | Wait
//! ```
//!
//! The on-demand path reuses the per-record step for a single record looked
//! up by code.

use std::{sync::Arc, time::Duration};

use rowsync_core::{
    error::CoreError,
    models::{Record, RecordCode, SyncState},
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::{DeliveryClient, DownstreamReply},
    error::{DeliveryError, ErrorCategory, Result, SyncError},
    selector::{EligibilitySelector, DEFAULT_PAGE_SIZE},
    store::{RecordStore, StoreTransaction},
};

/// Default wait between passes that found no more work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// Configuration for the synchronization engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Row cap per category group in one pass.
    pub page_size: usize,

    /// Wait after a pass that reported [`Continuation::Wait`].
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { page_size: DEFAULT_PAGE_SIZE, poll_interval: DEFAULT_POLL_INTERVAL }
    }
}

/// What the scheduler should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Run the next pass immediately.
    Continue,
    /// Wait for the poll interval first.
    Wait,
}

impl Continuation {
    /// Decides continuation from the size of a completed batch.
    ///
    /// A batch of exactly one or two full pages suggests more pending work.
    /// Any other size, including a partly filled second page, means the
    /// backlog is drained for now.
    pub fn after_batch(batch_len: usize, page_size: usize) -> Self {
        if batch_len == page_size || batch_len == 2 * page_size {
            Self::Continue
        } else {
            Self::Wait
        }
    }
}

/// Result of one delivery attempt together with its persisted state.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// The record as it was delivered.
    pub record: Record,
    /// Accepted reply, or the classified failure.
    pub outcome: std::result::Result<DownstreamReply, DeliveryError>,
    /// Whether the resulting state was written to the store.
    pub persisted: bool,
}

impl DeliveryReport {
    /// State derived from the outcome.
    pub fn state(&self) -> SyncState {
        target_state(&self.outcome)
    }

    /// Returns true when the downstream service accepted the record.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Summary of a committed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Records in the batch.
    pub selected: usize,
    /// Records written as `Synced`.
    pub synced: usize,
    /// Records written as `Failed`.
    pub failed: usize,
    /// Records whose state write failed; they stay `Pending`.
    pub update_errors: usize,
    /// What the scheduler should do next.
    pub continuation: Continuation,
}

impl PassReport {
    fn new(selected: usize, continuation: Continuation) -> Self {
        Self { selected, synced: 0, failed: 0, update_errors: 0, continuation }
    }

    fn tally(&mut self, report: &DeliveryReport) {
        if !report.persisted {
            self.update_errors += 1;
        } else if report.is_success() {
            self.synced += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Cumulative counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Passes committed.
    pub passes_completed: u64,
    /// Passes rolled back after a fault.
    pub passes_failed: u64,
    /// Records written as `Synced`.
    pub records_synced: u64,
    /// Records written as `Failed`.
    pub records_failed: u64,
    /// State writes that failed.
    pub update_errors: u64,
}

/// Engine coordinating selection, delivery and state updates.
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    client: DeliveryClient,
    selector: EligibilitySelector,
    config: SyncConfig,
    stats: Arc<RwLock<EngineStats>>,
}

impl SyncEngine {
    /// Creates a new engine.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` if the page size or poll interval
    /// is zero.
    pub fn new(
        store: Arc<dyn RecordStore>,
        client: DeliveryClient,
        config: SyncConfig,
    ) -> Result<Self> {
        if config.page_size == 0 {
            return Err(SyncError::configuration("page size must be greater than zero"));
        }
        if config.poll_interval.is_zero() {
            return Err(SyncError::configuration("poll interval must be greater than zero"));
        }

        Ok(Self {
            store,
            client,
            selector: EligibilitySelector::new(config.page_size),
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Store shared with the request layer.
    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Runs one delivery pass inside a single transaction.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Store` if the transaction cannot be opened, the
    /// selection fails or the commit fails. In each case no state change is
    /// kept.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let span = info_span!("sync_pass", page_size = self.config.page_size);

        async move {
            let result = self.run_pass_inner().await;

            let mut stats = self.stats.write().await;
            match &result {
                Ok(report) => {
                    stats.passes_completed += 1;
                    stats.records_synced += report.synced as u64;
                    stats.records_failed += report.failed as u64;
                    stats.update_errors += report.update_errors as u64;
                },
                Err(e) => {
                    stats.passes_failed += 1;
                    error!(error = %e, "sync pass aborted");
                },
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run_pass_inner(&self) -> Result<PassReport> {
        let mut tx = self.store.begin().await?;

        let batch = match self.selector.select(tx.as_mut()).await {
            Ok(batch) => batch,
            Err(e) => {
                rollback(tx).await;
                return Err(e.into());
            },
        };

        let continuation = Continuation::after_batch(batch.len(), self.selector.page_size());
        let mut report = PassReport::new(batch.len(), continuation);

        for (index, record) in batch.into_iter().enumerate() {
            let code = record.code.clone();
            let delivery = self.deliver_record(tx.as_mut(), record).await;
            report.tally(&delivery);
            info!(
                index,
                record_code = %code,
                state = %delivery.state(),
                persisted = delivery.persisted,
                "record processed"
            );
        }

        tx.commit().await?;

        info!(
            batch_size = report.selected,
            synced = report.synced,
            failed = report.failed,
            update_errors = report.update_errors,
            continuation = ?report.continuation,
            "sync pass committed"
        );

        Ok(report)
    }

    /// Delivers one caller-specified record outside the polling cycle.
    ///
    /// The record is looked up regardless of its delivery state, so a
    /// `Synced` or `Failed` record is delivered again.
    ///
    /// # Errors
    ///
    /// - `SyncError::RecordNotFound` if no record has this code
    /// - `SyncError::Store` if the lookup or the commit fails
    pub async fn sync_record(&self, code: &RecordCode) -> Result<DeliveryReport> {
        let span = info_span!("sync_record", record_code = %code);

        async move {
            let mut tx = self.store.begin().await?;

            let record = match tx.find_record(code).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    rollback(tx).await;
                    warn!("record not found");
                    return Err(SyncError::RecordNotFound { code: code.to_string() });
                },
                Err(e) => {
                    rollback(tx).await;
                    return Err(e.into());
                },
            };

            let report = self.deliver_record(tx.as_mut(), record).await;
            tx.commit().await?;

            let mut stats = self.stats.write().await;
            match (report.persisted, report.is_success()) {
                (false, _) => stats.update_errors += 1,
                (true, true) => stats.records_synced += 1,
                (true, false) => stats.records_failed += 1,
            }

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Attempts delivery of `record`, classifies the result and writes the
    /// matching state in `tx`.
    ///
    /// Never fails: delivery errors become `Failed`, and a failed state
    /// write is logged and reported through [`DeliveryReport::persisted`].
    pub async fn deliver_record(
        &self,
        tx: &mut dyn StoreTransaction,
        record: Record,
    ) -> DeliveryReport {
        let span = info_span!("record_delivery", record_code = %record.code);

        async move {
            let outcome = self.attempt(&record).await;
            let state = target_state(&outcome);

            let persisted = match tx.update_sync_state(&record.code, state).await {
                Ok(()) => true,
                Err(e) => {
                    log_update_error(&e, state);
                    false
                },
            };

            DeliveryReport { record, outcome, persisted }
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        record: &Record,
    ) -> std::result::Result<DownstreamReply, DeliveryError> {
        let outcome = self.client.deliver(record).await.and_then(DownstreamReply::into_result);

        match &outcome {
            Ok(reply) => debug!(message = %reply.message, "downstream accepted record"),
            Err(DeliveryError::Rejected { code, message }) => {
                warn!(
                    downstream_code = code,
                    downstream_message = %message,
                    "downstream rejected record"
                );
            },
            Err(e) => {
                warn!(category = %ErrorCategory::from(e), error = %e, "delivery failed");
            },
        }

        outcome
    }
}

fn target_state(outcome: &std::result::Result<DownstreamReply, DeliveryError>) -> SyncState {
    if outcome.is_ok() {
        SyncState::Synced
    } else {
        SyncState::Failed
    }
}

fn log_update_error(error: &CoreError, state: SyncState) {
    error!(error = %error, state = %state, "failed to write sync state, record stays pending");
}

async fn rollback(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "rollback failed");
    }
}
