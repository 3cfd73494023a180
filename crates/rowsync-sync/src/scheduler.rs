//! Background loop driving the engine.
//!
//! The loop alternates between running a pass and waiting. A pass that
//! reports [`Continuation::Continue`] is followed immediately by another;
//! anything else, including a failed or panicked pass, waits for the poll
//! interval first. Cancellation is observed between passes and while
//! waiting, never in the middle of a pass.

use std::{sync::Arc, time::Duration};

use rowsync_core::time::Clock;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    engine::{Continuation, SyncEngine},
    error::{Result, SyncError},
};

/// Polling loop around a [`SyncEngine`].
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler that stops when `cancellation_token` fires.
    pub fn new(
        engine: Arc<SyncEngine>,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { engine, clock, cancellation_token }
    }

    /// Runs passes until cancelled.
    pub async fn run(&self) {
        let poll_interval = self.engine.config().poll_interval;
        info!(poll_interval_seconds = poll_interval.as_secs(), "sync scheduler starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if self.run_contained_pass().await == Continuation::Continue {
                continue;
            }

            tokio::select! {
                () = self.clock.sleep(poll_interval) => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("sync scheduler stopped");
    }

    /// Runs one pass on its own task so a panic cannot take the loop down.
    async fn run_contained_pass(&self) -> Continuation {
        let engine = self.engine.clone();

        match tokio::spawn(async move { engine.run_pass().await }).await {
            Ok(Ok(report)) => report.continuation,
            Ok(Err(_)) => Continuation::Wait,
            Err(join_error) => {
                error!(error = %join_error, "sync pass panicked, transaction rolled back");
                Continuation::Wait
            },
        }
    }

    /// Spawns the loop onto the runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let cancellation_token = self.cancellation_token.clone();
        let handle = tokio::spawn(async move { self.run().await });

        SchedulerHandle { cancellation_token, handle }
    }
}

/// Handle to a spawned [`Scheduler`].
pub struct SchedulerHandle {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the loop and waits up to `grace` for an in-flight pass.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Internal` if the loop does not stop within
    /// `grace` or its task panicked.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        self.shutdown_until(Instant::now() + grace).await
    }

    /// Cancels the loop and waits for an in-flight pass until `deadline`.
    ///
    /// Lets the caller share one deadline across every component it stops.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Internal` if the loop does not stop by
    /// `deadline` or its task panicked.
    pub async fn shutdown_until(self, deadline: Instant) -> Result<()> {
        self.cancellation_token.cancel();

        match tokio::time::timeout_at(deadline, self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => {
                Err(SyncError::internal(format!("scheduler task failed: {join_error}")))
            },
            Err(_) => {
                warn!("scheduler did not stop before the shutdown deadline");
                Err(SyncError::internal("scheduler shutdown timed out"))
            },
        }
    }
}
