//! Reconciliation jobs and the scheduler that runs them.
//!
//! Each job re-derives correct state from durable facts (timestamps, the
//! provider ledger) on its own interval, bounded to one batch per tick. A
//! backlog drains over several ticks.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LifecycleResult;
use crate::lifecycle::RunReport;

pub mod reconcile;
pub mod scheduler;

pub use reconcile::{
    CancelExpiredOrders, DeactivateExpiredSubscriptions, ExpirePreReservations,
    ProcessConfirmedOrders, ReconcileProcessingInvoices, ReconcileStuckInvoices, standard_jobs,
};
pub use scheduler::{JobStats, Scheduler, SchedulerHandle};

/// One periodic reconciliation task.
#[async_trait]
pub trait ReconciliationJob: Send + Sync {
    /// Stable name used in logs and statistics.
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Process at most one batch.
    async fn run_once(&self) -> LifecycleResult<RunReport>;
}
