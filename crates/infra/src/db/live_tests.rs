//! Store contract checks against a live Postgres.
//!
//! Skipped unless `STOREFRONT_TEST_DATABASE_URL` is set. Every test works on
//! fresh ids, so runs can share one database.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sqlx::PgPool;

use storefront_core::{Currency, DomainError, Price, Transition, UserId};
use storefront_inventory::{Item, ItemStatus};
use storefront_invoicing::{Invoice, InvoiceState, PaymentMethod, ProviderId};
use storefront_products::{Product, ProductId, ProductKind};
use storefront_sales::{Order, OrderFilter, OrderListRequest, OrderStatus};
use storefront_subscriptions::Subscription;

use super::*;
use crate::config::DatabaseConfig;
use crate::external::ProductCatalog;
use crate::store::{InvoiceStore, ItemStore, OrderStore, SubscriptionStore};

async fn pool() -> Option<PgPool> {
    let url = std::env::var("STOREFRONT_TEST_DATABASE_URL").ok()?;
    let pool = connect(&DatabaseConfig {
        url,
        max_connections: 8,
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();
    migrate(&pool).await.unwrap();
    Some(pool)
}

async fn seed_product(pool: &PgPool, kind: ProductKind) -> ProductId {
    let period = (kind == ProductKind::Subscription).then(|| std::time::Duration::from_secs(30));
    let product = Product::new(
        kind,
        "Live product",
        "",
        Price::new(Currency::Xtr, dec!(100)).unwrap(),
        period,
        Utc::now(),
    )
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO products (id, kind, name, description, currency, amount, subscription_period_secs)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(product.id.as_uuid())
    .bind(product.kind.as_str())
    .bind(&product.name)
    .bind(&product.description)
    .bind(product.price.currency.code())
    .bind(product.price.amount)
    .bind(period.map(|p| p.as_secs() as i64))
    .execute(pool)
    .await
    .unwrap();
    product.id
}

#[tokio::test]
async fn concurrent_pre_reserve_hands_out_each_item_once() {
    let Some(pool) = pool().await else { return };
    let product_id = seed_product(&pool, ProductKind::Digital).await;
    let store = Arc::new(PgItemStore::new(pool.clone()));
    for n in 0..3 {
        store
            .add_item(Item::stocked(product_id, format!("KEY-{n}"), Utc::now()).unwrap())
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.pre_reserve(product_id).await }));
    }
    let mut won = Vec::new();
    let mut no_stock = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(id) => won.push(id),
            Err(e) if matches!(e.domain(), Some(DomainError::NoStock { .. })) => no_stock += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    won.sort();
    won.dedup();
    assert_eq!(won.len(), 3);
    assert_eq!(no_stock, 7);
    assert_eq!(store.count_available(product_id).await.unwrap(), 0);
}

#[tokio::test]
async fn item_transitions_are_conditional() {
    let Some(pool) = pool().await else { return };
    let product_id = seed_product(&pool, ProductKind::Digital).await;
    let store = PgItemStore::new(pool.clone());
    let id = store
        .add_item(Item::stocked(product_id, "KEY", Utc::now()).unwrap())
        .await
        .unwrap();

    let err = store.confirm_reserve(id).await.unwrap_err();
    assert!(err.is_stale());

    store.pre_reserve(product_id).await.unwrap();
    store.confirm_reserve(id).await.unwrap();
    let err = store.remove_item(id).await.unwrap_err();
    assert!(err.is_stale());
    assert_eq!(store.get_item(id).await.unwrap().status, ItemStatus::Reserved);

    let missing = storefront_inventory::ItemId::new();
    let err = store.mark_performed(missing).await.unwrap_err();
    assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
}

#[tokio::test]
async fn order_invoice_and_subscription_round_trip() {
    let Some(pool) = pool().await else { return };
    let product_id = seed_product(&pool, ProductKind::Subscription).await;
    let catalog = PgProductCatalog::new(pool.clone());
    let product = catalog.get_product(product_id).await.unwrap();
    assert_eq!(product.grants_subscription(), Some(std::time::Duration::from_secs(30)));

    let items = PgItemStore::new(pool.clone());
    items
        .add_item(Item::stocked(product_id, "KEY", Utc::now()).unwrap())
        .await
        .unwrap();
    let item_id = items.pre_reserve(product_id).await.unwrap();

    let orders = PgOrderStore::new(pool.clone());
    let user_id = UserId::new();
    let order = Order::form(
        user_id,
        item_id,
        product_id,
        product.price,
        Duration::minutes(15),
        Utc::now(),
    )
    .unwrap();
    let order_id = orders.insert_order(order).await.unwrap();
    orders
        .change_status(
            order_id,
            Transition::request(OrderStatus::Form, OrderStatus::ExpectPayments).unwrap(),
        )
        .await
        .unwrap();

    let mut request = OrderListRequest::default();
    request.filter = OrderFilter::with_status(OrderStatus::ExpectPayments);
    request.filter.user_id = Some(user_id);
    let listed = orders.list_orders(&request).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].price.amount, dec!(100));

    let invoices = PgInvoiceStore::new(pool.clone());
    let open_invoice =
        || Invoice::open(order_id, product.price, PaymentMethod::Telegram, Utc::now());
    let invoice_id = invoices.insert_invoice(open_invoice()).await.unwrap();
    let err = invoices.insert_invoice(open_invoice()).await.unwrap_err();
    assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
    let pid = ProviderId::new("ch_live").unwrap();
    invoices
        .change_state(
            invoice_id,
            Transition::request(InvoiceState::ExpectPayment, InvoiceState::Handling).unwrap(),
            Some(&pid),
        )
        .await
        .unwrap();
    invoices
        .change_state(
            invoice_id,
            Transition::request(InvoiceState::Handling, InvoiceState::Canceled).unwrap(),
            None,
        )
        .await
        .unwrap();
    let invoice = invoices.get_invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.state, InvoiceState::Canceled);
    assert_eq!(invoice.provider_id, Some(pid));
    invoices.insert_invoice(open_invoice()).await.unwrap();

    let subscriptions = PgSubscriptionStore::new(pool.clone());
    let open_subscription = || {
        Subscription::open(user_id, order_id, "Live", Duration::seconds(30), Utc::now()).unwrap()
    };
    let first = subscriptions.insert_subscription(open_subscription()).await.unwrap();
    let second = subscriptions.insert_subscription(open_subscription()).await.unwrap();
    assert_eq!(first.id, second.id);
}
