//! Process wiring for the reconciliation worker.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use storefront_infra::db::{
    self, PgInvoiceStore, PgItemStore, PgOrderStore, PgProductCatalog, PgSubscriptionStore,
    PgUserDirectory,
};
use storefront_infra::external::{DeferredNotifier, TelegramBot};
use storefront_infra::jobs::{Scheduler, standard_jobs};
use storefront_infra::{Backends, Services, ShopConfig};

/// Lifecycle services over Postgres, with the bot as notification channel
/// and payment ledger.
pub fn postgres_services(
    pool: &PgPool,
    bot: Arc<TelegramBot>,
    config: &ShopConfig,
) -> anyhow::Result<Services> {
    let notifier = DeferredNotifier::arc();
    let services = Services::assemble(
        Backends {
            items: Arc::new(PgItemStore::new(pool.clone())),
            orders: Arc::new(PgOrderStore::new(pool.clone())),
            invoices: Arc::new(PgInvoiceStore::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionStore::new(pool.clone())),
            catalog: Arc::new(PgProductCatalog::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool.clone())),
            notifier: notifier.clone(),
            ledger: bot.clone(),
        },
        config,
    );
    notifier.bind(bot).context("binding notification channel")?;
    Ok(services)
}

/// Connect, bootstrap the schema and run every reconciliation job until
/// `shutdown` resolves.
pub async fn run(config: ShopConfig, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let bot = Arc::new(TelegramBot::new(&config.telegram).context("creating bot client")?);
    let pool = db::connect(&config.database)
        .await
        .context("connecting to database")?;
    db::migrate(&pool).await.context("applying schema")?;

    let services = postgres_services(&pool, bot, &config)?;
    let handle = Scheduler::new(CancellationToken::new())
        .with_jobs(standard_jobs(&services, &config.jobs))
        .start();
    tracing::info!("worker started");

    shutdown.await;
    tracing::info!("shutdown requested");
    handle.shutdown().await;
    pool.close().await;
    Ok(())
}
