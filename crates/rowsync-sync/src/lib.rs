//! Record synchronization engine.
//!
//! Moves pending records from the local store to the downstream HTTP
//! service and tracks each record's delivery state.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Scheduler │──▶│ SyncEngine │──▶│ DeliveryClient│──▶│ Downstream API │
//! └───────────┘   └────────────┘   └──────────────┘   └────────────────┘
//!                   │       ▲
//!                   ▼       │
//!             ┌─────────────────────┐
//!             │ RecordStore (tx)    │
//!             │ EligibilitySelector │
//!             └─────────────────────┘
//! ```
//!
//! Each pass runs in one store transaction: select up to one page per
//! category group, deliver records one by one, write `Synced` or `Failed`
//! for each, commit. The on-demand path delivers a single record through
//! the same per-record step.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rowsync_core::storage::Storage;
//! use rowsync_sync::{
//!     ClientConfig, DeliveryClient, PostgresRecordStore, SyncConfig, SyncEngine,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(PostgresRecordStore::new(Arc::new(Storage::new(pool))));
//! let client = DeliveryClient::new(ClientConfig::default())?;
//! let engine = SyncEngine::new(store, client, SyncConfig::default())?;
//!
//! let report = engine.run_pass().await?;
//! println!("delivered {} records", report.selected);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod selector;
pub mod store;

pub use client::{ClientConfig, DeliveryClient, DownstreamReply};
pub use engine::{Continuation, DeliveryReport, EngineStats, PassReport, SyncConfig, SyncEngine};
pub use error::{DeliveryError, ErrorCategory, Result, SyncError};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use selector::EligibilitySelector;
pub use store::{PostgresRecordStore, RecordStore, StoreTransaction};
