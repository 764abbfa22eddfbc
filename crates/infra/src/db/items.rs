//! Postgres item store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{Span, instrument};

use storefront_core::{DomainError, Transition};
use storefront_inventory::{Item, ItemId, ItemStatus};
use storefront_products::ProductId;

use super::{
    decode, is_foreign_key_violation, lock_status, map_sqlx_error, parse_column, transition_row,
};
use crate::error::{LifecycleError, LifecycleResult};
use crate::store::ItemStore;

const COLUMNS: &str = "id, product_id, status, payload, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn item_from_row(row: &PgRow) -> LifecycleResult<Item> {
    const OP: &str = "decode_item";
    Ok(Item {
        id: ItemId::from_uuid(decode(OP, row.try_get("id"))?),
        product_id: ProductId::from_uuid(decode(OP, row.try_get("product_id"))?),
        status: parse_column(row, OP, "status")?,
        payload: decode(OP, row.try_get("payload"))?,
        created_at: decode(OP, row.try_get("created_at"))?,
        updated_at: decode(OP, row.try_get("updated_at"))?,
    })
}

#[async_trait]
impl ItemStore for PgItemStore {
    #[instrument(skip(self, item), fields(item_id = %item.id, product_id = %item.product_id), err)]
    async fn add_item(&self, item: Item) -> LifecycleResult<ItemId> {
        sqlx::query(
            r#"
            INSERT INTO items (id, product_id, status, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(item.status.as_str())
        .bind(&item.payload)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_item", e))?;
        Ok(item.id)
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn remove_item(&self, id: ItemId) -> LifecycleResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = lock_status(&mut tx, "remove_item", "items", "status", *id.as_uuid()).await?;
        match current.as_deref() {
            None => return Err(DomainError::not_found(ItemId::LABEL, id).into()),
            Some(status) if status != ItemStatus::Sale.as_str() => {
                return Err(DomainError::stale(ItemId::LABEL, id).into());
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM items WHERE id = $1 AND status = $2")
            .bind(id.as_uuid())
            .bind(ItemStatus::Sale.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    LifecycleError::from(DomainError::validation(
                        "item belongs to an order and cannot be removed",
                    ))
                } else {
                    map_sqlx_error("remove_item", e)
                }
            })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn get_item(&self, id: ItemId) -> LifecycleResult<Item> {
        let sql = format!("SELECT {COLUMNS} FROM items WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?
            .ok_or_else(|| DomainError::not_found(ItemId::LABEL, id))?;
        item_from_row(&row)
    }

    /// Oldest `Sale` item first. Rows locked by a concurrent reserver are
    /// skipped rather than waited on, so a busy product never reports a false
    /// "no stock" while other units remain.
    #[instrument(skip(self), fields(product_id = %product_id, item_id), err)]
    async fn pre_reserve(&self, product_id: ProductId) -> LifecycleResult<ItemId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            SELECT id FROM items
            WHERE product_id = $1 AND status = $2
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(ItemStatus::Sale.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("pre_reserve", e))?
        .ok_or_else(|| DomainError::no_stock(product_id))?;
        let id = ItemId::from_uuid(decode("pre_reserve", row.try_get("id"))?);

        let updated = sqlx::query(
            "UPDATE items SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(ItemStatus::Sale.as_str())
        .bind(ItemStatus::PreReserved.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("pre_reserve", e))?;
        if updated.rows_affected() == 0 {
            return Err(DomainError::stale(ItemId::LABEL, id).into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Span::current().record("item_id", tracing::field::display(id));
        Ok(id)
    }

    #[instrument(skip(self), fields(item_id = %id, transition = %transition), err)]
    async fn change_status(
        &self,
        id: ItemId,
        transition: Transition<ItemStatus>,
    ) -> LifecycleResult<()> {
        transition_row(
            &self.pool,
            "change_item_status",
            ItemId::LABEL,
            "items",
            "status",
            *id.as_uuid(),
            transition.from().as_str(),
            transition.to().as_str(),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn scan_expired_pre_reserved(
        &self,
        limit: u32,
        older_than: DateTime<Utc>,
    ) -> LifecycleResult<Vec<Item>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM items WHERE status = $1 AND updated_at < $2 ORDER BY updated_at ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(ItemStatus::PreReserved.as_str())
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("scan_expired_pre_reserved", e))?;
        rows.iter().map(item_from_row).collect()
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn count_available(&self, product_id: ProductId) -> LifecycleResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE product_id = $1 AND status = $2")
                .bind(product_id.as_uuid())
                .bind(ItemStatus::Sale.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("count_available", e))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
