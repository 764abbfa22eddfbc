//! Postgres subscription store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::instrument;

use storefront_core::{DomainError, Pagination, Transition, UserId};
use storefront_sales::OrderId;
use storefront_subscriptions::{Subscription, SubscriptionFilter, SubscriptionId, SubscriptionState};

use super::{any_of, decode, limit_offset, map_sqlx_error, parse_column, transition_row, window};
use crate::error::LifecycleResult;
use crate::store::SubscriptionStore;

const COLUMNS: &str = "id, user_id, order_id, description, state, deadline, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn subscription_from_row(row: &PgRow) -> LifecycleResult<Subscription> {
    const OP: &str = "decode_subscription";
    Ok(Subscription {
        id: SubscriptionId::from_uuid(decode(OP, row.try_get("id"))?),
        user_id: UserId::from_uuid(decode(OP, row.try_get("user_id"))?),
        order_id: OrderId::from_uuid(decode(OP, row.try_get("order_id"))?),
        description: decode(OP, row.try_get("description"))?,
        state: parse_column(row, OP, "state")?,
        deadline: decode(OP, row.try_get("deadline"))?,
        created_at: decode(OP, row.try_get("created_at"))?,
        updated_at: decode(OP, row.try_get("updated_at"))?,
    })
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    /// `order_id` is unique; a second insert for the same order returns the
    /// row that won.
    #[instrument(skip(self, subscription), fields(order_id = %subscription.order_id), err)]
    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> LifecycleResult<Subscription> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, order_id, description, state, deadline, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(subscription.order_id.as_uuid())
        .bind(&subscription.description)
        .bind(subscription.state.as_str())
        .bind(subscription.deadline)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_subscription", e))?;

        let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE order_id = $1");
        let row = sqlx::query(&sql)
            .bind(subscription.order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_subscription", e))?
            .ok_or_else(|| DomainError::not_found(SubscriptionId::LABEL, subscription.order_id))?;
        subscription_from_row(&row)
    }

    #[instrument(skip(self), fields(subscription_id = %id), err)]
    async fn get_subscription(&self, id: SubscriptionId) -> LifecycleResult<Subscription> {
        let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_subscription", e))?
            .ok_or_else(|| DomainError::not_found(SubscriptionId::LABEL, id))?;
        subscription_from_row(&row)
    }

    #[instrument(skip(self), fields(subscription_id = %id, transition = %transition), err)]
    async fn change_state(
        &self,
        id: SubscriptionId,
        transition: Transition<SubscriptionState>,
    ) -> LifecycleResult<()> {
        transition_row(
            &self.pool,
            "change_subscription_state",
            SubscriptionId::LABEL,
            "subscriptions",
            "state",
            *id.as_uuid(),
            transition.from().as_str(),
            transition.to().as_str(),
        )
        .await
    }

    #[instrument(skip(self, filter), err)]
    async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
        page: Pagination,
    ) -> LifecycleResult<Vec<Subscription>> {
        let (deadline_from, deadline_to) = window(&filter.deadline);
        let (limit, offset) = limit_offset(page);
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM subscriptions
            WHERE ($1::text[] IS NULL OR state = ANY($1))
                AND ($2::timestamptz IS NULL OR deadline >= $2)
                AND ($3::timestamptz IS NULL OR deadline < $3)
                AND ($4::uuid IS NULL OR user_id = $4)
            ORDER BY deadline ASC, id ASC
            LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(any_of(&filter.states))
            .bind(deadline_from)
            .bind(deadline_to)
            .bind(filter.user_id.map(|user| *user.as_uuid()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_subscriptions", e))?;
        rows.iter().map(subscription_from_row).collect()
    }
}
