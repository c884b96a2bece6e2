//! Background sweeps.
//!
//! Each sweep is a [`PeriodicTask`]: one pass of work plus the interval
//! between passes. [`run_periodic`] drives a task with the environment's
//! clock until the shutdown signal flips, so simulation drives sweeps on
//! virtual time and tests call [`PeriodicTask::run_once`] directly.

use std::{fmt::Debug, future::Future, time::Duration};

use shroud_core::{Environment, ShroudError};
use tokio::sync::watch;

use crate::{
    delivery::Delivery,
    router::{CleanupReport, Router},
    session::{RotationSweepReport, SessionManager},
    storage::{ExpiringStore, MessageStore},
};

/// One unit of periodic background work.
pub trait PeriodicTask: Send + Sync + 'static {
    /// Summary of one pass
    type Report: Debug + Send;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Time between the end of one pass and the start of the next
    fn interval(&self) -> Duration;

    /// Run a single pass.
    fn run_once(&self) -> impl Future<Output = Result<Self::Report, ShroudError>> + Send;
}

/// Rotates every session whose secondary id is due.
pub struct RotationSweep<E: Environment, S: ExpiringStore> {
    sessions: SessionManager<E, S>,
    interval: Duration,
    concurrency: usize,
}

impl<E: Environment, S: ExpiringStore> RotationSweep<E, S> {
    /// Sweep `sessions` every `interval`, rotating at most `concurrency`
    /// sessions at a time.
    pub fn new(sessions: SessionManager<E, S>, interval: Duration, concurrency: usize) -> Self {
        Self { sessions, interval, concurrency }
    }
}

impl<E: Environment, S: ExpiringStore> PeriodicTask for RotationSweep<E, S> {
    type Report = RotationSweepReport;

    fn name(&self) -> &'static str {
        "rotation"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_once(&self) -> impl Future<Output = Result<Self::Report, ShroudError>> + Send {
        self.sessions.rotate_due_sessions(self.concurrency)
    }
}

/// Prunes expired routing index entries.
pub struct RoutingCleanup<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    router: Router<E, S, M, D>,
    interval: Duration,
}

impl<E, S, M, D> RoutingCleanup<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    /// Clean `router`'s index every `interval`.
    pub fn new(router: Router<E, S, M, D>, interval: Duration) -> Self {
        Self { router, interval }
    }
}

impl<E, S, M, D> PeriodicTask for RoutingCleanup<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    type Report = CleanupReport;

    fn name(&self) -> &'static str {
        "routing-cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_once(&self) -> impl Future<Output = Result<Self::Report, ShroudError>> + Send {
        self.router.cleanup_routing_data()
    }
}

/// Run `task` every `task.interval()` until `shutdown` becomes true or its
/// sender is dropped.
///
/// A failed pass is logged and the schedule continues.
pub async fn run_periodic<E, T>(env: E, task: T, mut shutdown: watch::Receiver<bool>)
where
    E: Environment,
    T: PeriodicTask,
{
    tracing::info!(task = task.name(), interval = ?task.interval(), "periodic task started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            () = env.sleep(task.interval()) => {}
        }

        match task.run_once().await {
            Ok(report) => tracing::info!(task = task.name(), ?report, "periodic pass finished"),
            Err(err) => tracing::warn!(task = task.name(), error = %err, "periodic pass failed"),
        }
    }

    tracing::info!(task = task.name(), "periodic task stopped");
}
