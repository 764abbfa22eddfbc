//! In-memory stores for tests/dev.
//!
//! Each store keeps its rows behind one lock, so a status check and the write
//! that follows it happen atomically, which is the same guarantee the Postgres
//! stores get from row locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use storefront_core::{DomainError, Entity, Pagination, StatusMachine, Transition};
use storefront_inventory::{Item, ItemId, ItemStatus};
use storefront_invoicing::{Invoice, InvoiceId, InvoiceListRequest, InvoiceState, ProviderId};
use storefront_products::ProductId;
use storefront_sales::{Order, OrderId, OrderListRequest, OrderStatus};
use storefront_subscriptions::{Subscription, SubscriptionFilter, SubscriptionId, SubscriptionState};

use super::{InvoiceStore, ItemStore, OrderStore, SubscriptionStore};
use crate::error::{LifecycleError, LifecycleResult};

/// Rows of one entity keyed by id.
#[derive(Debug)]
struct Table<E: Entity> {
    label: &'static str,
    rows: RwLock<HashMap<E::Id, E>>,
}

impl<E> Table<E>
where
    E: Entity + Clone,
    E::Id: Copy + Hash + core::fmt::Display,
{
    fn new(label: &'static str) -> Self {
        Self {
            label,
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> LifecycleResult<RwLockReadGuard<'_, HashMap<E::Id, E>>> {
        self.rows
            .read()
            .map_err(|_| LifecycleError::storage("read_lock", format!("{} table poisoned", self.label)))
    }

    fn write(&self) -> LifecycleResult<RwLockWriteGuard<'_, HashMap<E::Id, E>>> {
        self.rows
            .write()
            .map_err(|_| LifecycleError::storage("write_lock", format!("{} table poisoned", self.label)))
    }

    fn insert(&self, id: E::Id, row: E) -> LifecycleResult<E::Id> {
        let mut rows = self.write()?;
        if rows.contains_key(&id) {
            return Err(DomainError::validation(format!("duplicate {} {}", self.label, id)).into());
        }
        rows.insert(id, row);
        Ok(id)
    }

    fn get(&self, id: E::Id) -> LifecycleResult<E> {
        self.read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(self.label, id).into())
    }

    /// Apply `transition` if the row is still in `transition.from()`.
    fn transition<S: StatusMachine>(
        &self,
        id: E::Id,
        transition: Transition<S>,
        status: impl Fn(&mut E) -> &mut S,
        touch: impl FnOnce(&mut E),
    ) -> LifecycleResult<()> {
        let mut rows = self.write()?;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(self.label, id))?;
        let current = status(row);
        if *current != transition.from() {
            return Err(DomainError::stale(self.label, id).into());
        }
        *current = transition.to();
        touch(row);
        Ok(())
    }

    fn select(&self, keep: impl Fn(&E) -> bool) -> LifecycleResult<Vec<E>> {
        Ok(self.read()?.values().filter(|row| keep(row)).cloned().collect())
    }
}

fn page<T>(rows: Vec<T>, page: Pagination) -> Vec<T> {
    rows.into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

#[derive(Debug)]
pub struct InMemoryItemStore {
    items: Table<Item>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self {
            items: Table::new(ItemId::LABEL),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn add_item(&self, item: Item) -> LifecycleResult<ItemId> {
        if item.status != ItemStatus::Sale {
            return Err(DomainError::validation("new items must be on sale").into());
        }
        self.items.insert(item.id, item)
    }

    async fn remove_item(&self, id: ItemId) -> LifecycleResult<()> {
        let mut rows = self.items.write()?;
        match rows.get(&id) {
            None => Err(DomainError::not_found(ItemId::LABEL, id).into()),
            Some(item) if item.status != ItemStatus::Sale => {
                Err(DomainError::stale(ItemId::LABEL, id).into())
            }
            Some(_) => {
                rows.remove(&id);
                Ok(())
            }
        }
    }

    async fn get_item(&self, id: ItemId) -> LifecycleResult<Item> {
        self.items.get(id)
    }

    async fn pre_reserve(&self, product_id: ProductId) -> LifecycleResult<ItemId> {
        let mut rows = self.items.write()?;
        let item = rows
            .values_mut()
            .filter(|item| item.product_id == product_id && item.status == ItemStatus::Sale)
            .min_by_key(|item| (item.created_at, item.id))
            .ok_or_else(|| DomainError::no_stock(product_id))?;
        item.status = ItemStatus::PreReserved;
        item.updated_at = Utc::now();
        Ok(item.id)
    }

    async fn change_status(
        &self,
        id: ItemId,
        transition: Transition<ItemStatus>,
    ) -> LifecycleResult<()> {
        self.items.transition(
            id,
            transition,
            |item| &mut item.status,
            |item| item.updated_at = Utc::now(),
        )
    }

    async fn scan_expired_pre_reserved(
        &self,
        limit: u32,
        older_than: DateTime<Utc>,
    ) -> LifecycleResult<Vec<Item>> {
        let mut rows = self.items.select(|item| {
            item.status == ItemStatus::PreReserved && item.updated_at < older_than
        })?;
        rows.sort_by_key(|item| (item.updated_at, item.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_available(&self, product_id: ProductId) -> LifecycleResult<u64> {
        let rows = self.items.read()?;
        Ok(rows
            .values()
            .filter(|item| item.product_id == product_id && item.status == ItemStatus::Sale)
            .count() as u64)
    }
}

#[derive(Debug)]
pub struct InMemoryOrderStore {
    orders: Table<Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: Table::new(OrderId::LABEL),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: Order) -> LifecycleResult<OrderId> {
        self.orders.insert(order.id, order)
    }

    async fn get_order(&self, id: OrderId) -> LifecycleResult<Order> {
        self.orders.get(id)
    }

    async fn change_status(
        &self,
        id: OrderId,
        transition: Transition<OrderStatus>,
    ) -> LifecycleResult<()> {
        self.orders.transition(
            id,
            transition,
            |order| &mut order.status,
            |order| order.updated_at = Utc::now(),
        )
    }

    async fn list_orders(&self, request: &OrderListRequest) -> LifecycleResult<Vec<Order>> {
        let mut rows = self.orders.select(|order| request.filter.matches(order))?;
        rows.sort_by(|a, b| {
            request
                .sort
                .apply((a.created_at, a.id).cmp(&(b.created_at, b.id)))
        });
        Ok(page(rows, request.page))
    }
}

#[derive(Debug)]
pub struct InMemoryInvoiceStore {
    invoices: Table<Invoice>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self {
            invoices: Table::new(InvoiceId::LABEL),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Rewrite `updated_at`, for tests that need an invoice to look stale.
    pub fn backdate(&self, id: InvoiceId, updated_at: DateTime<Utc>) -> LifecycleResult<()> {
        let mut rows = self.invoices.write()?;
        let invoice = rows
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(InvoiceId::LABEL, id))?;
        invoice.updated_at = updated_at;
        Ok(())
    }
}

impl Default for InMemoryInvoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn insert_invoice(&self, invoice: Invoice) -> LifecycleResult<InvoiceId> {
        self.invoices.insert(invoice.id, invoice)
    }

    async fn get_invoice(&self, id: InvoiceId) -> LifecycleResult<Invoice> {
        self.invoices.get(id)
    }

    async fn change_state(
        &self,
        id: InvoiceId,
        transition: Transition<InvoiceState>,
        provider_id: Option<&ProviderId>,
    ) -> LifecycleResult<()> {
        self.invoices.transition(
            id,
            transition,
            |invoice| &mut invoice.state,
            |invoice| {
                invoice.updated_at = Utc::now();
                if let Some(provider_id) = provider_id {
                    invoice.provider_id = Some(provider_id.clone());
                }
            },
        )
    }

    async fn list_invoices(&self, request: &InvoiceListRequest) -> LifecycleResult<Vec<Invoice>> {
        let mut rows = self.invoices.select(|invoice| request.filter.matches(invoice))?;
        rows.sort_by(|a, b| {
            request
                .sort
                .apply((a.updated_at, a.id).cmp(&(b.updated_at, b.id)))
        });
        Ok(page(rows, request.page))
    }
}

#[derive(Debug)]
pub struct InMemorySubscriptionStore {
    subscriptions: Table<Subscription>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Table::new(SubscriptionId::LABEL),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> LifecycleResult<Subscription> {
        let mut rows = self.subscriptions.write()?;
        if let Some(existing) = rows
            .values()
            .find(|row| row.order_id == subscription.order_id)
        {
            return Ok(existing.clone());
        }
        rows.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(&self, id: SubscriptionId) -> LifecycleResult<Subscription> {
        self.subscriptions.get(id)
    }

    async fn change_state(
        &self,
        id: SubscriptionId,
        transition: Transition<SubscriptionState>,
    ) -> LifecycleResult<()> {
        self.subscriptions.transition(
            id,
            transition,
            |subscription| &mut subscription.state,
            |subscription| subscription.updated_at = Utc::now(),
        )
    }

    async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
        page_request: Pagination,
    ) -> LifecycleResult<Vec<Subscription>> {
        let mut rows = self.subscriptions.select(|row| filter.matches(row))?;
        rows.sort_by_key(|row| (row.deadline, row.id));
        Ok(page(rows, page_request))
    }
}
