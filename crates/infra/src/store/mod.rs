//! Persistence contracts of the four lifecycle entities.
//!
//! Every status-changing method takes a validated [`Transition`] and applies it
//! as a conditional update keyed on `transition.from()`. An update that
//! matches no row because the entity already left `from` fails with
//! [`DomainError::StaleTransition`]; an unknown id fails with
//! [`DomainError::NotFound`]. Implementations must uphold this under
//! concurrent callers from several processes, so the Postgres stores lock the
//! row (`SELECT ... FOR UPDATE`) inside a transaction before updating it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use storefront_core::{DomainError, Pagination, Transition};
use storefront_inventory::{Item, ItemId, ItemStatus};
use storefront_invoicing::{Invoice, InvoiceId, InvoiceListRequest, InvoiceState, ProviderId};
use storefront_products::ProductId;
use storefront_sales::{Order, OrderId, OrderListRequest, OrderStatus};
use storefront_subscriptions::{Subscription, SubscriptionFilter, SubscriptionId, SubscriptionState};

use crate::error::LifecycleResult;

pub mod in_memory;

pub use in_memory::{
    InMemoryInvoiceStore, InMemoryItemStore, InMemoryOrderStore, InMemorySubscriptionStore,
};

/// Inventory reservation store.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Stock a new `Sale` item.
    async fn add_item(&self, item: Item) -> LifecycleResult<ItemId>;

    /// Delete an item that is still `Sale`. Held or sold items are stale.
    async fn remove_item(&self, id: ItemId) -> LifecycleResult<()>;

    async fn get_item(&self, id: ItemId) -> LifecycleResult<Item>;

    /// Atomically take one `Sale` item of the product into `PreReserved`.
    ///
    /// No two concurrent callers may receive the same item. Fails with
    /// [`DomainError::NoStock`] when nothing is on sale.
    async fn pre_reserve(&self, product_id: ProductId) -> LifecycleResult<ItemId>;

    /// Conditional status update.
    async fn change_status(
        &self,
        id: ItemId,
        transition: Transition<ItemStatus>,
    ) -> LifecycleResult<()>;

    /// `PreReserved` items last touched before `older_than`, oldest first.
    async fn scan_expired_pre_reserved(
        &self,
        limit: u32,
        older_than: DateTime<Utc>,
    ) -> LifecycleResult<Vec<Item>>;

    /// Number of `Sale` items of the product.
    async fn count_available(&self, product_id: ProductId) -> LifecycleResult<u64>;

    /// `PreReserved -> Reserved`.
    async fn confirm_reserve(&self, id: ItemId) -> LifecycleResult<()> {
        let transition = Transition::request(ItemStatus::PreReserved, ItemStatus::Reserved)?;
        self.change_status(id, transition).await
    }

    /// Hand a held item back to `Sale`. `held` is the hold the caller expects.
    async fn release(&self, id: ItemId, held: ItemStatus) -> LifecycleResult<()> {
        if !held.is_held() {
            return Err(DomainError::validation(format!("{held} is not a hold")).into());
        }
        let transition = Transition::request(held, ItemStatus::Sale)?;
        self.change_status(id, transition).await
    }

    /// `Reserved -> Performed`.
    async fn mark_performed(&self, id: ItemId) -> LifecycleResult<()> {
        let transition = Transition::request(ItemStatus::Reserved, ItemStatus::Performed)?;
        self.change_status(id, transition).await
    }

    /// `Performed -> Realized`.
    async fn mark_realized(&self, id: ItemId) -> LifecycleResult<()> {
        let transition = Transition::request(ItemStatus::Performed, ItemStatus::Realized)?;
        self.change_status(id, transition).await
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: Order) -> LifecycleResult<OrderId>;

    async fn get_order(&self, id: OrderId) -> LifecycleResult<Order>;

    async fn change_status(
        &self,
        id: OrderId,
        transition: Transition<OrderStatus>,
    ) -> LifecycleResult<()>;

    /// Filtered, sorted by `created_at`, paged.
    async fn list_orders(&self, request: &OrderListRequest) -> LifecycleResult<Vec<Order>>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert_invoice(&self, invoice: Invoice) -> LifecycleResult<InvoiceId>;

    async fn get_invoice(&self, id: InvoiceId) -> LifecycleResult<Invoice>;

    /// Conditional state update; `provider_id`, when given, is attached in the
    /// same write.
    async fn change_state(
        &self,
        id: InvoiceId,
        transition: Transition<InvoiceState>,
        provider_id: Option<&ProviderId>,
    ) -> LifecycleResult<()>;

    /// Filtered, sorted by `updated_at`, paged.
    async fn list_invoices(&self, request: &InvoiceListRequest) -> LifecycleResult<Vec<Invoice>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persist a subscription, at most one per order.
    ///
    /// When the order already has one, the existing row is returned untouched.
    async fn insert_subscription(&self, subscription: Subscription)
    -> LifecycleResult<Subscription>;

    async fn get_subscription(&self, id: SubscriptionId) -> LifecycleResult<Subscription>;

    async fn change_state(
        &self,
        id: SubscriptionId,
        transition: Transition<SubscriptionState>,
    ) -> LifecycleResult<()>;

    /// Filtered, sorted by deadline (earliest first), paged.
    async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
        page: Pagination,
    ) -> LifecycleResult<Vec<Subscription>>;
}
