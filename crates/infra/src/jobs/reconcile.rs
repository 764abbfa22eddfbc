//! The six standard reconciliation jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::ReconciliationJob;
use crate::config::{JobSchedule, JobsConfig};
use crate::error::LifecycleResult;
use crate::lifecycle::{
    InventoryService, OrderService, PaymentService, RunReport, Services, SubscriptionService,
};

/// `PreReserved -> Sale` for reservations past their TTL.
pub struct ExpirePreReservations {
    pub inventory: Arc<InventoryService>,
    pub schedule: JobSchedule,
}

#[async_trait]
impl ReconciliationJob for ExpirePreReservations {
    fn name(&self) -> &'static str {
        "expire_pre_reservations"
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    async fn run_once(&self) -> LifecycleResult<RunReport> {
        self.inventory
            .expire_pre_reservations(Utc::now(), self.schedule.batch)
            .await
    }
}

/// Fulfil orders in `Processing`.
pub struct ProcessConfirmedOrders {
    pub orders: Arc<OrderService>,
    pub schedule: JobSchedule,
}

#[async_trait]
impl ReconciliationJob for ProcessConfirmedOrders {
    fn name(&self) -> &'static str {
        "process_confirmed_orders"
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    async fn run_once(&self) -> LifecycleResult<RunReport> {
        self.orders.process_confirmed_orders(self.schedule.batch).await
    }
}

/// Cancel unpaid orders past their TTL.
pub struct CancelExpiredOrders {
    pub orders: Arc<OrderService>,
    pub schedule: JobSchedule,
}

#[async_trait]
impl ReconciliationJob for CancelExpiredOrders {
    fn name(&self) -> &'static str {
        "cancel_expired_orders"
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    async fn run_once(&self) -> LifecycleResult<RunReport> {
        self.orders
            .cancel_expired_orders(Utc::now(), self.schedule.batch)
            .await
    }
}

/// Settle provider-confirmed invoices.
pub struct ReconcileProcessingInvoices {
    pub payments: Arc<PaymentService>,
    pub schedule: JobSchedule,
}

#[async_trait]
impl ReconciliationJob for ReconcileProcessingInvoices {
    fn name(&self) -> &'static str {
        "reconcile_processing_invoices"
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    async fn run_once(&self) -> LifecycleResult<RunReport> {
        self.payments
            .reconcile_processing_invoices(self.schedule.batch)
            .await
    }
}

/// Resolve invoices stuck in `Handling` against the provider ledger.
pub struct ReconcileStuckInvoices {
    pub payments: Arc<PaymentService>,
    pub schedule: JobSchedule,
}

#[async_trait]
impl ReconciliationJob for ReconcileStuckInvoices {
    fn name(&self) -> &'static str {
        "reconcile_stuck_invoices"
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    async fn run_once(&self) -> LifecycleResult<RunReport> {
        self.payments
            .reconcile_stuck_invoices(Utc::now(), self.schedule.batch)
            .await
    }
}

pub struct DeactivateExpiredSubscriptions {
    pub subscriptions: Arc<SubscriptionService>,
    pub schedule: JobSchedule,
}

#[async_trait]
impl ReconciliationJob for DeactivateExpiredSubscriptions {
    fn name(&self) -> &'static str {
        "deactivate_expired_subscriptions"
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    async fn run_once(&self) -> LifecycleResult<RunReport> {
        self.subscriptions
            .deactivate_expired(Utc::now(), self.schedule.batch)
            .await
    }
}

/// All six jobs on their configured schedules.
pub fn standard_jobs(services: &Services, config: &JobsConfig) -> Vec<Arc<dyn ReconciliationJob>> {
    let mut jobs: Vec<Arc<dyn ReconciliationJob>> = Vec::with_capacity(6);
    jobs.push(Arc::new(ExpirePreReservations {
        inventory: services.inventory.clone(),
        schedule: config.expire_pre_reservations,
    }));
    jobs.push(Arc::new(ProcessConfirmedOrders {
        orders: services.orders.clone(),
        schedule: config.process_confirmed_orders,
    }));
    jobs.push(Arc::new(CancelExpiredOrders {
        orders: services.orders.clone(),
        schedule: config.cancel_expired_orders,
    }));
    jobs.push(Arc::new(ReconcileProcessingInvoices {
        payments: services.payments.clone(),
        schedule: config.reconcile_processing_invoices,
    }));
    jobs.push(Arc::new(ReconcileStuckInvoices {
        payments: services.payments.clone(),
        schedule: config.reconcile_stuck_invoices,
    }));
    jobs.push(Arc::new(DeactivateExpiredSubscriptions {
        subscriptions: services.subscriptions.clone(),
        schedule: config.deactivate_expired_subscriptions,
    }));
    jobs
}
