//! Postgres invoice store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::instrument;

use storefront_core::{DomainError, Transition};
use storefront_invoicing::{Invoice, InvoiceId, InvoiceListRequest, InvoiceState, ProviderId};
use storefront_sales::OrderId;

use super::{any_of, decode, limit_offset, lock_status, map_sqlx_error, parse_column, price_column, window};
use crate::error::{LifecycleError, LifecycleResult};
use crate::store::InvoiceStore;

const COLUMNS: &str =
    "id, order_id, state, currency, amount, method, provider_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn invoice_from_row(row: &PgRow) -> LifecycleResult<Invoice> {
    const OP: &str = "decode_invoice";
    let provider_id: Option<String> = decode(OP, row.try_get("provider_id"))?;
    let provider_id = provider_id
        .map(ProviderId::new)
        .transpose()
        .map_err(|e| LifecycleError::storage(OP, format!("corrupt provider_id column: {e}")))?;
    Ok(Invoice {
        id: InvoiceId::from_uuid(decode(OP, row.try_get("id"))?),
        order_id: OrderId::from_uuid(decode(OP, row.try_get("order_id"))?),
        state: parse_column(row, OP, "state")?,
        price: price_column(row, OP)?,
        method: parse_column(row, OP, "method")?,
        provider_id,
        created_at: decode(OP, row.try_get("created_at"))?,
        updated_at: decode(OP, row.try_get("updated_at"))?,
    })
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id, order_id = %invoice.order_id), err)]
    async fn insert_invoice(&self, invoice: Invoice) -> LifecycleResult<InvoiceId> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, order_id, state, currency, amount, method, provider_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.order_id.as_uuid())
        .bind(invoice.state.as_str())
        .bind(invoice.price.currency.code())
        .bind(invoice.price.amount)
        .bind(invoice.method.as_str())
        .bind(invoice.provider_id.as_ref().map(ProviderId::as_str))
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        Ok(invoice.id)
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn get_invoice(&self, id: InvoiceId) -> LifecycleResult<Invoice> {
        let sql = format!("SELECT {COLUMNS} FROM invoices WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_invoice", e))?
            .ok_or_else(|| DomainError::not_found(InvoiceId::LABEL, id))?;
        invoice_from_row(&row)
    }

    /// The provider id, when given, is written together with the state and
    /// never cleared by a later transition.
    #[instrument(skip(self), fields(invoice_id = %id, transition = %transition), err)]
    async fn change_state(
        &self,
        id: InvoiceId,
        transition: Transition<InvoiceState>,
        provider_id: Option<&ProviderId>,
    ) -> LifecycleResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match lock_status(&mut tx, "change_invoice_state", "invoices", "state", *id.as_uuid())
            .await?
        {
            None => return Err(DomainError::not_found(InvoiceId::LABEL, id).into()),
            Some(state) if state != transition.from().as_str() => {
                return Err(DomainError::stale(InvoiceId::LABEL, id).into());
            }
            Some(_) => {}
        }

        let updated = sqlx::query(
            r#"
            UPDATE invoices
            SET state = $3, provider_id = COALESCE($4, provider_id), updated_at = $5
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(transition.from().as_str())
        .bind(transition.to().as_str())
        .bind(provider_id.map(ProviderId::as_str))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("change_invoice_state", e))?;
        if updated.rows_affected() == 0 {
            return Err(DomainError::stale(InvoiceId::LABEL, id).into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, request), err)]
    async fn list_invoices(&self, request: &InvoiceListRequest) -> LifecycleResult<Vec<Invoice>> {
        let filter = &request.filter;
        let (updated_from, updated_to) = window(&filter.updated);
        let (limit, offset) = limit_offset(request.page);
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM invoices
            WHERE ($1::text[] IS NULL OR state = ANY($1))
                AND ($2::timestamptz IS NULL OR updated_at >= $2)
                AND ($3::timestamptz IS NULL OR updated_at < $3)
                AND ($4::uuid IS NULL OR order_id = $4)
            ORDER BY updated_at {order}, id {order}
            LIMIT $5 OFFSET $6
            "#,
            order = request.sort.as_sql(),
        );
        let rows = sqlx::query(&sql)
            .bind(any_of(&filter.states))
            .bind(updated_from)
            .bind(updated_to)
            .bind(filter.order_id.map(|order| *order.as_uuid()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_invoices", e))?;
        rows.iter().map(invoice_from_row).collect()
    }
}
