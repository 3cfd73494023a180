//! rowsync HTTP API.
//!
//! Exposes the on-demand sync operation and health checks, and owns the
//! layered service configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use rowsync_core::Clock;
use rowsync_sync::{RecordStore, SyncEngine};

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use server::{create_router, serve, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Engine running on-demand deliveries.
    pub engine: Arc<SyncEngine>,
    /// Clock used to time health checks.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates handler state around `engine`.
    pub fn new(engine: Arc<SyncEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Store shared with the engine.
    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.engine.store()
    }
}
