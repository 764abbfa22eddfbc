//! Lifecycle services.
//!
//! Each service exclusively owns one entity's store and exposes the only
//! operations that mutate it. Cross-entity effects go through the owning
//! service (payments call into orders, orders call into inventory and
//! subscriptions).
//!
//! Side-effect ordering is write-then-notify: the conditional write commits
//! first, and only the caller whose write won sends the customer message.
//! A failed message is logged and counted, never rolled back.

use std::sync::Arc;

use serde::Serialize;
use storefront_core::UserId;

use crate::config::ShopConfig;
use crate::external::{Notification, Notifier, PaymentProvider, ProductCatalog, UserDirectory};
use crate::store::{InvoiceStore, ItemStore, OrderStore, SubscriptionStore};

pub mod inventory;
pub mod orders;
pub mod payments;
pub mod subscriptions;

pub use inventory::InventoryService;
pub use orders::OrderService;
pub use payments::{LedgerScan, PaymentService};
pub use subscriptions::SubscriptionService;

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Rows moved to their next state.
    pub processed: usize,
    /// Rows left for a later run (lost a race, rejected).
    pub skipped: usize,
    /// Rows whose customer message could not be delivered.
    pub unnotified: usize,
}

impl RunReport {
    pub fn is_idle(&self) -> bool {
        self.processed == 0 && self.skipped == 0
    }
}

/// Resolves a customer's address and delivers a message to it.
#[derive(Clone)]
pub struct Courier {
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl Courier {
    pub fn new(users: Arc<dyn UserDirectory>, notifier: Arc<dyn Notifier>) -> Self {
        Self { users, notifier }
    }

    /// Deliver `notification` to `user_id`. Returns whether it was delivered;
    /// failures are logged, not propagated.
    pub async fn deliver(&self, user_id: UserId, notification: &Notification) -> bool {
        let contact = match self.users.get_user(user_id).await {
            Ok(contact) => contact,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "cannot resolve notification address");
                return false;
            }
        };
        match self.notifier.send(&contact.address, notification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user_id = %user_id, title = %notification.title, error = %e, "notification not delivered");
                false
            }
        }
    }
}

/// Stores and collaborators the services are built over.
pub struct Backends {
    pub items: Arc<dyn ItemStore>,
    pub orders: Arc<dyn OrderStore>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub users: Arc<dyn UserDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Arc<dyn PaymentProvider>,
}

/// The four lifecycle services, wired together.
#[derive(Clone)]
pub struct Services {
    pub inventory: Arc<InventoryService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub subscriptions: Arc<SubscriptionService>,
}

impl Services {
    pub fn assemble(backends: Backends, config: &ShopConfig) -> Self {
        let courier = Courier::new(backends.users, backends.notifier);
        let inventory = Arc::new(InventoryService::new(
            backends.items,
            config.lifecycle.pre_reserve_ttl(),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            backends.subscriptions,
            courier.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            backends.orders,
            inventory.clone(),
            subscriptions.clone(),
            backends.catalog,
            courier,
            config.lifecycle.order_time_limit(),
        ));
        let payments = Arc::new(PaymentService::new(
            backends.invoices,
            orders.clone(),
            backends.ledger,
            config.lifecycle.handling_timeout(),
            config.jobs.ledger_scan(),
        ));
        Self {
            inventory,
            orders,
            payments,
            subscriptions,
        }
    }
}
