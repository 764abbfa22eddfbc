//! Subscription lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use storefront_core::{DomainError, Pagination, Transition, UserId};
use storefront_sales::OrderId;
use storefront_subscriptions::{Subscription, SubscriptionFilter, SubscriptionId, SubscriptionState};

use super::{Courier, RunReport};
use crate::error::LifecycleResult;
use crate::external::Notification;
use crate::store::SubscriptionStore;

pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionStore>,
    courier: Courier,
}

impl SubscriptionService {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, courier: Courier) -> Self {
        Self {
            subscriptions,
            courier,
        }
    }

    /// Persist a subscription. The state is forced to `Active`.
    pub async fn create_subscription(
        &self,
        mut subscription: Subscription,
    ) -> LifecycleResult<Subscription> {
        subscription.state = SubscriptionState::Active;
        let stored = self.subscriptions.insert_subscription(subscription).await?;
        tracing::info!(
            subscription_id = %stored.id,
            order_id = %stored.order_id,
            deadline = %stored.deadline,
            "subscription active"
        );
        Ok(stored)
    }

    /// Open the subscription granted by a fulfilled order.
    pub async fn open_for_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
        description: &str,
        period: Duration,
    ) -> LifecycleResult<Subscription> {
        let subscription = Subscription::open(user_id, order_id, description, period, Utc::now())?;
        self.create_subscription(subscription).await
    }

    pub async fn get_subscription(
        &self,
        id: SubscriptionId,
        user_id: UserId,
    ) -> LifecycleResult<Subscription> {
        let subscription = self.subscriptions.get_subscription(id).await?;
        if subscription.user_id != user_id {
            return Err(DomainError::Forbidden.into());
        }
        Ok(subscription)
    }

    pub async fn user_subscriptions(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> LifecycleResult<Vec<Subscription>> {
        self.subscriptions
            .list_subscriptions(&SubscriptionFilter::for_user(user_id), page)
            .await
    }

    /// Deactivate active subscriptions past their deadline and tell the owner.
    pub async fn deactivate_expired(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> LifecycleResult<RunReport> {
        let mut report = RunReport::default();
        let expired = self
            .subscriptions
            .list_subscriptions(&SubscriptionFilter::expired(now), Pagination::first(batch))
            .await?;

        for subscription in expired {
            let transition = Transition::request(subscription.state, SubscriptionState::Inactive)?;
            match self.subscriptions.change_state(subscription.id, transition).await {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_stale() => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            let notification = Notification::new(
                "Subscription expired",
                format!(
                    "{} ended on {}. Order № {}",
                    subscription.description,
                    subscription.deadline.format("%Y-%m-%d %H:%M UTC"),
                    subscription.order_id
                ),
            );
            if !self.courier.deliver(subscription.user_id, &notification).await {
                report.unnotified += 1;
            }
        }
        Ok(report)
    }
}
