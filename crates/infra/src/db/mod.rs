//! Postgres adapters.
//!
//! Every status change runs in its own transaction: the row is locked with
//! `SELECT ... FOR UPDATE`, checked against the transition's `from`, and
//! updated with `WHERE id = $1 AND <status> = <from>`. Zero affected rows is a
//! stale transition. Multiple worker processes may share one database, so
//! correctness never relies on in-process locks.
//!
//! ## Error mapping
//!
//! | SQLSTATE | Meaning | `LifecycleError` |
//! |----------|---------|------------------|
//! | `23505` | unique violation | `Domain(Validation("duplicate ..."))` |
//! | `23503` | foreign key violation | `Domain(NotFound)` |
//! | other / no code | | `Storage` |

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use storefront_core::{Currency, DomainError, Price, TimeRange};

use crate::config::DatabaseConfig;
use crate::error::{LifecycleError, LifecycleResult};

pub mod catalog;
pub mod invoices;
pub mod items;
pub mod orders;
pub mod subscriptions;

#[cfg(test)]
mod live_tests;

pub use catalog::{PgProductCatalog, PgUserDirectory};
pub use invoices::PgInvoiceStore;
pub use items::PgItemStore;
pub use orders::PgOrderStore;
pub use subscriptions::PgSubscriptionStore;

/// DDL for the lifecycle tables and the catalog/user tables they reference.
pub const SCHEMA: &str = include_str!("../../migrations/0001_lifecycle.sql");

pub async fn connect(config: &DatabaseConfig) -> LifecycleResult<PgPool> {
    if config.url.is_empty() {
        return Err(LifecycleError::Config("database url is not set".to_string()));
    }
    PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the schema. Idempotent.
pub async fn migrate(pool: &PgPool) -> LifecycleResult<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    info!("database schema is up to date");
    Ok(())
}

pub fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> LifecycleError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DomainError::validation(format!("duplicate: {message}")).into(),
                Some("23503") => DomainError::not_found(
                    "reference",
                    db_err.constraint().unwrap_or("foreign key"),
                )
                .into(),
                _ => LifecycleError::storage(operation, message),
            }
        }
        sqlx::Error::PoolClosed => LifecycleError::storage(operation, "connection pool closed"),
        other => LifecycleError::storage(operation, other.to_string()),
    }
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503"))
}

/// Lock one row and return its status column. `None` when the row is missing.
pub(crate) async fn lock_status(
    tx: &mut Transaction<'_, Postgres>,
    operation: &'static str,
    table: &'static str,
    column: &'static str,
    id: Uuid,
) -> LifecycleResult<Option<String>> {
    let sql = format!("SELECT {column} FROM {table} WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    row.map(|row| row.try_get::<String, _>(column))
        .transpose()
        .map_err(|e| map_sqlx_error(operation, e))
}

pub(crate) fn decode<T>(operation: &'static str, result: Result<T, sqlx::Error>) -> LifecycleResult<T> {
    result.map_err(|e| map_sqlx_error(operation, e))
}

/// Parse a stored enum column.
pub(crate) fn parse_column<T>(row: &PgRow, operation: &'static str, column: &str) -> LifecycleResult<T>
where
    T: core::str::FromStr<Err = DomainError>,
{
    let raw: String = decode(operation, row.try_get(column))?;
    raw.parse::<T>().map_err(|e| {
        LifecycleError::storage(operation, format!("corrupt {column} column: {e}"))
    })
}

pub(crate) fn price_column(row: &PgRow, operation: &'static str) -> LifecycleResult<Price> {
    let currency: Currency = parse_column(row, operation, "currency")?;
    let amount = decode(operation, row.try_get("amount"))?;
    Price::new(currency, amount)
        .map_err(|e| LifecycleError::storage(operation, format!("corrupt price: {e}")))
}

/// `(from, to)` bounds of a window for `($n IS NULL OR col >= $n)` filters.
pub(crate) fn window(range: &TimeRange) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (range.from, range.to)
}

/// Bind value for an optional `= ANY($n)` filter. Empty means unfiltered.
pub(crate) fn any_of<S: ToString>(values: &[S]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.iter().map(ToString::to_string).collect())
}

pub(crate) fn limit_offset(page: storefront_core::Pagination) -> (i64, i64) {
    (i64::from(page.limit), i64::from(page.offset))
}

/// Lock, check and conditionally update one row's status column.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn transition_row(
    pool: &PgPool,
    operation: &'static str,
    entity: &'static str,
    table: &'static str,
    column: &'static str,
    id: Uuid,
    from: &str,
    to: &str,
) -> LifecycleResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;

    match lock_status(&mut tx, operation, table, column, id).await? {
        None => return Err(DomainError::not_found(entity, id).into()),
        Some(current) if current != from => return Err(DomainError::stale(entity, id).into()),
        Some(_) => {}
    }

    let sql = format!(
        "UPDATE {table} SET {column} = $3, updated_at = $4 WHERE id = $1 AND {column} = $2"
    );
    let updated = sqlx::query(&sql)
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    if updated.rows_affected() == 0 {
        return Err(DomainError::stale(entity, id).into());
    }

    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}
