//! Order lifecycle: creation against reserved stock, payment-driven status
//! changes, TTL reaping and fulfilment.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use storefront_core::{DomainError, Pagination, SortOrder, Transition, UserId};
use storefront_inventory::ItemStatus;
use storefront_products::ProductId;
use storefront_sales::{
    Order, OrderFilter, OrderId, OrderListRequest, OrderProduct, OrderStatus, OrderView,
};

use super::{Courier, InventoryService, RunReport, SubscriptionService};
use crate::error::{LifecycleError, LifecycleResult};
use crate::external::{Notification, ProductCatalog};
use crate::store::OrderStore;

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<InventoryService>,
    subscriptions: Arc<SubscriptionService>,
    catalog: Arc<dyn ProductCatalog>,
    courier: Courier,
    time_limit: Duration,
}

fn order_notice(order_id: OrderId, body: impl Into<String>) -> Notification {
    Notification::new(format!("Order № {order_id}"), body)
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<InventoryService>,
        subscriptions: Arc<SubscriptionService>,
        catalog: Arc<dyn ProductCatalog>,
        courier: Courier,
        time_limit: Duration,
    ) -> Self {
        Self {
            orders,
            inventory,
            subscriptions,
            catalog,
            courier,
            time_limit,
        }
    }

    /// Reserve one unit of `product_id` for `user_id` and open an order awaiting
    /// payment.
    ///
    /// A failure after the order row exists leaves it in `Form`; the TTL job
    /// reaps it and the pre-reservation expires on its own.
    pub async fn create_order(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> LifecycleResult<OrderId> {
        let product = self.catalog.get_product(product_id).await?;
        let item_id = self.inventory.pre_reserve(product_id).await?;

        let order = Order::form(
            user_id,
            item_id,
            product_id,
            product.price,
            self.time_limit,
            Utc::now(),
        )?;
        let order_id = self.orders.insert_order(order).await?;

        if let Err(e) = self.inventory.confirm_reserve(item_id).await {
            tracing::warn!(order_id = %order_id, item_id = %item_id, error = %e, "reservation lapsed before confirmation");
            return Err(e);
        }

        let transition = Transition::request(OrderStatus::Form, OrderStatus::ExpectPayments)?;
        if let Err(e) = self.orders.change_status(order_id, transition).await {
            // The order stays in Form and is never reaped with a release, so
            // hand the confirmed unit back now.
            if let Err(release) = self.inventory.release(item_id, ItemStatus::Reserved).await {
                tracing::error!(order_id = %order_id, item_id = %item_id, error = %release, "cannot release item of unfinished order");
            }
            return Err(e);
        }

        tracing::info!(order_id = %order_id, user_id = %user_id, item_id = %item_id, "order awaiting payment");
        Ok(order_id)
    }

    /// The order with its product resolved from current state.
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> LifecycleResult<OrderView> {
        let order = self.orders.get_order(order_id).await?;
        order.ensure_owner(user_id)?;
        self.enrich(order).await
    }

    /// The caller's orders. The user filter is always the caller.
    pub async fn get_order_list(
        &self,
        user_id: UserId,
        mut request: OrderListRequest,
    ) -> LifecycleResult<Vec<OrderView>> {
        request.filter.user_id = Some(user_id);
        let orders = self.orders.list_orders(&request).await?;
        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            views.push(self.enrich(order).await?);
        }
        Ok(views)
    }

    async fn enrich(&self, order: Order) -> LifecycleResult<OrderView> {
        let item = self.inventory.get_item(order.item_id).await?;
        let product = self.catalog.get_product(item.product_id).await?;
        let deliverable = (order.status == OrderStatus::Performed).then_some(item.payload);
        Ok(OrderView {
            product: OrderProduct {
                item_id: item.id,
                product_id: product.id,
                title: product.name,
                description: product.description,
            },
            order,
            deliverable,
        })
    }

    /// A payment attempt started.
    pub async fn payment_handling(&self, order_id: OrderId) -> LifecycleResult<()> {
        let order = self.orders.get_order(order_id).await?;
        self.advance(&order, OrderStatus::Handling).await?;
        Ok(())
    }

    /// The provider confirmed payment.
    pub async fn processing(&self, order_id: OrderId) -> LifecycleResult<()> {
        let order = self.orders.get_order(order_id).await?;
        if self.advance(&order, OrderStatus::Processing).await? {
            let notice = order_notice(
                order.id,
                "Payment received, the item will arrive in a separate message",
            );
            self.courier.deliver(order.user_id, &notice).await;
        }
        Ok(())
    }

    pub async fn canceled(&self, order_id: OrderId) -> LifecycleResult<()> {
        let order = self.orders.get_order(order_id).await?;
        self.cancel(&order).await?;
        Ok(())
    }

    /// Apply `order.status -> to`. Returns whether this call made the change.
    ///
    /// Equal state is a no-op. Losing a race to a caller that already reached
    /// `to` also counts as a no-op; any other lost race is stale.
    async fn advance(&self, order: &Order, to: OrderStatus) -> LifecycleResult<bool> {
        let Some(transition) = Transition::request_or_noop(order.status, to)? else {
            return Ok(false);
        };
        match self.orders.change_status(order.id, transition).await {
            Ok(()) => {
                tracing::info!(order_id = %order.id, from = %order.status, to = %to, "order status changed");
                Ok(true)
            }
            Err(e) if e.is_stale() => {
                let current = self.orders.get_order(order.id).await?;
                if current.status == to {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel, release the confirmed unit, tell the customer.
    ///
    /// Orders still in `Form` never confirmed their reservation; their
    /// pre-reservation expires through the inventory job.
    async fn cancel(&self, order: &Order) -> LifecycleResult<bool> {
        if !self.advance(order, OrderStatus::Cancelled).await? {
            return Ok(false);
        }
        if order.status != OrderStatus::Form {
            match self.inventory.release(order.item_id, ItemStatus::Reserved).await {
                Ok(()) => {}
                Err(e) if e.is_stale() => {
                    tracing::warn!(order_id = %order.id, item_id = %order.item_id, "cancelled order did not hold its item");
                }
                Err(e) => return Err(e),
            }
        }
        let notice = order_notice(order.id, "The order was cancelled");
        self.courier.deliver(order.user_id, &notice).await;
        Ok(true)
    }

    /// Cancel unpaid orders whose TTL has passed.
    pub async fn cancel_expired_orders(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> LifecycleResult<RunReport> {
        let request = OrderListRequest {
            filter: OrderFilter::expired(now),
            sort: SortOrder::Asc,
            page: Pagination::first(batch),
        };
        let mut report = RunReport::default();
        for order in self.orders.list_orders(&request).await? {
            match self.cancel(&order).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                // A payment attempt started in the meantime.
                Err(e) if e.is_rejection() => {
                    tracing::debug!(order_id = %order.id, error = %e, "expired order moved on");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Fulfil paid orders: mark the unit sold, open the subscription the
    /// product grants, complete the order and deliver the payload.
    pub async fn process_confirmed_orders(&self, batch: u32) -> LifecycleResult<RunReport> {
        let request = OrderListRequest {
            filter: OrderFilter::with_status(OrderStatus::Processing),
            sort: SortOrder::Asc,
            page: Pagination::first(batch),
        };
        let mut report = RunReport::default();
        for order in self.orders.list_orders(&request).await? {
            match self.fulfil(&order).await {
                Ok(Some(delivered)) => {
                    report.processed += 1;
                    if !delivered {
                        report.unnotified += 1;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) if e.is_rejection() => {
                    tracing::warn!(order_id = %order.id, error = %e, "order cannot be fulfilled yet");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// `Some(delivered)` when this call completed the order.
    async fn fulfil(&self, order: &Order) -> LifecycleResult<Option<bool>> {
        self.inventory.mark_performed(order.item_id).await?;

        let product = self.catalog.get_product(order.product_id).await?;
        if let Some(period) = product.grants_subscription() {
            let period = Duration::from_std(period)
                .map_err(|e| LifecycleError::from(DomainError::validation(e.to_string())))?;
            self.subscriptions
                .open_for_order(order.user_id, order.id, &product.name, period)
                .await?;
        }

        if !self.advance(order, OrderStatus::Performed).await? {
            return Ok(None);
        }

        let item = self.inventory.get_item(order.item_id).await?;
        let notice = order_notice(order.id, format!("{}\n{}", product.name, item.payload));
        let delivered = self.courier.deliver(order.user_id, &notice).await;
        if delivered {
            if let Err(e) = self.inventory.mark_realized(order.item_id).await {
                tracing::warn!(order_id = %order.id, item_id = %order.item_id, error = %e, "delivered item not realized");
            }
        }
        Ok(Some(delivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use storefront_core::{Currency, Price};
    use storefront_products::{Product, ProductKind};

    use crate::external::{InMemoryCatalog, InMemoryUserDirectory, RecordingNotifier};
    use crate::store::{InMemoryItemStore, InMemoryOrderStore, InMemorySubscriptionStore};

    struct Fixture {
        orders: OrderService,
        inventory: Arc<InventoryService>,
        store: Arc<InMemoryOrderStore>,
        notifier: Arc<RecordingNotifier>,
        user_id: UserId,
        product_id: ProductId,
    }

    async fn fixture(kind: ProductKind, stock: usize) -> Fixture {
        let users = InMemoryUserDirectory::arc();
        let user_id = UserId::new();
        users.register(user_id, "4242").unwrap();
        let notifier = RecordingNotifier::arc();
        let courier = Courier::new(users, notifier.clone());

        let catalog = InMemoryCatalog::arc();
        let period = (kind == ProductKind::Subscription).then(|| std::time::Duration::from_secs(30));
        let product = Product::new(
            kind,
            "VPN",
            "Private network access",
            Price::new(Currency::Xtr, dec!(100)).unwrap(),
            period,
            Utc::now(),
        )
        .unwrap();
        let product_id = catalog.insert(product).unwrap();

        let inventory = Arc::new(InventoryService::new(
            InMemoryItemStore::arc(),
            Duration::minutes(1),
        ));
        for n in 0..stock {
            inventory.stock(product_id, &format!("KEY-{n}")).await.unwrap();
        }
        let subscriptions = Arc::new(SubscriptionService::new(
            InMemorySubscriptionStore::arc(),
            courier.clone(),
        ));
        let store = InMemoryOrderStore::arc();
        let orders = OrderService::new(
            store.clone(),
            inventory.clone(),
            subscriptions,
            catalog,
            courier,
            Duration::minutes(15),
        );

        Fixture {
            orders,
            inventory,
            store,
            notifier,
            user_id,
            product_id,
        }
    }

    #[tokio::test]
    async fn create_order_reserves_and_awaits_payment() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();

        let view = f.orders.get_order(order_id, f.user_id).await.unwrap();
        assert_eq!(view.order.status, OrderStatus::ExpectPayments);
        assert_eq!(view.product.title, "VPN");
        assert!(view.deliverable.is_none());
        let item = f.inventory.get_item(view.order.item_id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Reserved);

        let err = f.orders.create_order(UserId::new(), f.product_id).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NoStock { .. })));
    }

    #[tokio::test]
    async fn foreign_order_is_forbidden() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        let err = f.orders.get_order(order_id, UserId::new()).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Forbidden)));
    }

    #[tokio::test]
    async fn order_list_is_scoped_to_caller() {
        let f = fixture(ProductKind::Digital, 2).await;
        let stranger = UserId::new();
        f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        f.orders.create_order(stranger, f.product_id).await.unwrap();

        let mut request = OrderListRequest::default();
        request.filter.user_id = Some(stranger);
        let mine = f.orders.get_order_list(f.user_id, request).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].order.user_id, f.user_id);
    }

    #[tokio::test]
    async fn processing_twice_notifies_once() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        f.orders.payment_handling(order_id).await.unwrap();

        f.orders.processing(order_id).await.unwrap();
        f.orders.processing(order_id).await.unwrap();

        let order = f.store.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(f.notifier.sent_matching("Payment received"), 1);
    }

    #[tokio::test]
    async fn processing_an_unpaid_order_is_illegal() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        let err = f.orders.processing(order_id).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::IllegalTransition { .. })));
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn expired_order_is_cancelled_and_item_released() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();

        let report = f.orders.cancel_expired_orders(Utc::now(), 15).await.unwrap();
        assert!(report.is_idle());

        let later = Utc::now() + Duration::minutes(16);
        let report = f.orders.cancel_expired_orders(later, 15).await.unwrap();
        assert_eq!(report.processed, 1);

        let order = f.store.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(f.inventory.count_available(f.product_id).await.unwrap(), 1);
        assert_eq!(f.notifier.sent_matching("cancelled"), 1);

        f.orders.canceled(order_id).await.unwrap();
        assert_eq!(f.notifier.sent_matching("cancelled"), 1);
    }

    #[tokio::test]
    async fn orders_in_payment_are_not_reaped() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        f.orders.payment_handling(order_id).await.unwrap();

        let later = Utc::now() + Duration::minutes(16);
        let report = f.orders.cancel_expired_orders(later, 15).await.unwrap();
        assert!(report.is_idle());
        let order = f.store.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Handling);
    }

    #[tokio::test]
    async fn fulfilment_delivers_payload_and_opens_subscription() {
        let f = fixture(ProductKind::Subscription, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        f.orders.payment_handling(order_id).await.unwrap();
        f.orders.processing(order_id).await.unwrap();

        let report = f.orders.process_confirmed_orders(15).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.unnotified, 0);

        let view = f.orders.get_order(order_id, f.user_id).await.unwrap();
        assert_eq!(view.order.status, OrderStatus::Performed);
        assert_eq!(view.deliverable.as_deref(), Some("KEY-0"));
        let item = f.inventory.get_item(view.order.item_id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Realized);
        assert_eq!(f.notifier.sent_matching("KEY-0"), 1);

        let report = f.orders.process_confirmed_orders(15).await.unwrap();
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn undelivered_payload_leaves_item_performed() {
        let f = fixture(ProductKind::Digital, 1).await;
        let order_id = f.orders.create_order(f.user_id, f.product_id).await.unwrap();
        f.orders.payment_handling(order_id).await.unwrap();
        f.orders.processing(order_id).await.unwrap();
        f.notifier.set_failing(true);

        let report = f.orders.process_confirmed_orders(15).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.unnotified, 1);

        let view = f.orders.get_order(order_id, f.user_id).await.unwrap();
        assert_eq!(view.order.status, OrderStatus::Performed);
        let item = f.inventory.get_item(view.order.item_id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Performed);
    }
}
