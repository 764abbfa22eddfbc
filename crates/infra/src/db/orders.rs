//! Postgres order store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::instrument;

use storefront_core::{DomainError, Transition, UserId};
use storefront_inventory::ItemId;
use storefront_products::ProductId;
use storefront_sales::{Order, OrderId, OrderListRequest, OrderStatus};

use super::{any_of, decode, limit_offset, map_sqlx_error, parse_column, price_column, transition_row, window};
use crate::error::LifecycleResult;
use crate::store::OrderStore;

const COLUMNS: &str =
    "id, user_id, item_id, product_id, currency, amount, status, ttl, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn order_from_row(row: &PgRow) -> LifecycleResult<Order> {
    const OP: &str = "decode_order";
    Ok(Order {
        id: OrderId::from_uuid(decode(OP, row.try_get("id"))?),
        user_id: UserId::from_uuid(decode(OP, row.try_get("user_id"))?),
        item_id: ItemId::from_uuid(decode(OP, row.try_get("item_id"))?),
        product_id: ProductId::from_uuid(decode(OP, row.try_get("product_id"))?),
        price: price_column(row, OP)?,
        status: parse_column(row, OP, "status")?,
        ttl: decode(OP, row.try_get("ttl"))?,
        created_at: decode(OP, row.try_get("created_at"))?,
        updated_at: decode(OP, row.try_get("updated_at"))?,
    })
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id, user_id = %order.user_id), err)]
    async fn insert_order(&self, order: Order) -> LifecycleResult<OrderId> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, item_id, product_id, currency, amount, status, ttl, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.item_id.as_uuid())
        .bind(order.product_id.as_uuid())
        .bind(order.price.currency.code())
        .bind(order.price.amount)
        .bind(order.status.as_str())
        .bind(order.ttl)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(order.id)
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn get_order(&self, id: OrderId) -> LifecycleResult<Order> {
        let sql = format!("SELECT {COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?
            .ok_or_else(|| DomainError::not_found(OrderId::LABEL, id))?;
        order_from_row(&row)
    }

    #[instrument(skip(self), fields(order_id = %id, transition = %transition), err)]
    async fn change_status(
        &self,
        id: OrderId,
        transition: Transition<OrderStatus>,
    ) -> LifecycleResult<()> {
        transition_row(
            &self.pool,
            "change_order_status",
            OrderId::LABEL,
            "orders",
            "status",
            *id.as_uuid(),
            transition.from().as_str(),
            transition.to().as_str(),
        )
        .await
    }

    #[instrument(skip(self, request), err)]
    async fn list_orders(&self, request: &OrderListRequest) -> LifecycleResult<Vec<Order>> {
        let filter = &request.filter;
        let (ttl_from, ttl_to) = window(&filter.ttl);
        let (limit, offset) = limit_offset(request.page);
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM orders
            WHERE ($1::text[] IS NULL OR status = ANY($1))
                AND ($2::timestamptz IS NULL OR ttl >= $2)
                AND ($3::timestamptz IS NULL OR ttl < $3)
                AND ($4::uuid IS NULL OR user_id = $4)
            ORDER BY created_at {order}, id {order}
            LIMIT $5 OFFSET $6
            "#,
            order = request.sort.as_sql(),
        );
        let rows = sqlx::query(&sql)
            .bind(any_of(&filter.statuses))
            .bind(ttl_from)
            .bind(ttl_to)
            .bind(filter.user_id.map(|user| *user.as_uuid()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_orders", e))?;
        rows.iter().map(order_from_row).collect()
    }
}
