//! Read-only Postgres adapters for the product catalog and user directory.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::instrument;

use storefront_core::{DomainError, UserId};
use storefront_products::{Product, ProductId};

use super::{decode, map_sqlx_error, parse_column, price_column};
use crate::error::{LifecycleError, LifecycleResult};
use crate::external::{Contact, ProductCatalog, Recipient, UserDirectory};

#[derive(Debug, Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn get_product(&self, product_id: ProductId) -> LifecycleResult<Product> {
        const OP: &str = "get_product";
        let row = sqlx::query(
            r#"
            SELECT id, kind, name, description, currency, amount, subscription_period_secs,
                   created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?
        .ok_or_else(|| DomainError::not_found(ProductId::LABEL, product_id))?;

        let period: Option<i64> = decode(OP, row.try_get("subscription_period_secs"))?;
        let subscription_period = period
            .map(|secs| {
                u64::try_from(secs).map(Duration::from_secs).map_err(|_| {
                    LifecycleError::storage(OP, format!("negative subscription period: {secs}"))
                })
            })
            .transpose()?;

        Ok(Product {
            id: ProductId::from_uuid(decode(OP, row.try_get("id"))?),
            kind: parse_column(&row, OP, "kind")?,
            name: decode(OP, row.try_get("name"))?,
            description: decode(OP, row.try_get("description"))?,
            price: price_column(&row, OP)?,
            subscription_period,
            created_at: decode(OP, row.try_get("created_at"))?,
            updated_at: decode(OP, row.try_get("updated_at"))?,
        })
    }
}

/// Resolves users to their bot chat.
#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get_user(&self, user_id: UserId) -> LifecycleResult<Contact> {
        let chat_id: String = sqlx::query_scalar("SELECT chat_id FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?
            .ok_or_else(|| DomainError::not_found("user", user_id))?;
        Ok(Contact {
            user_id,
            address: Recipient(chat_id),
        })
    }
}
