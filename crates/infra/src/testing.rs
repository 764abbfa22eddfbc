//! In-memory shop assembled for lifecycle and scheduler tests.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use storefront_core::{Currency, Price, UserId};
use storefront_products::{Product, ProductId, ProductKind};
use storefront_invoicing::{InvoiceId, InvoiceState};
use storefront_sales::{OrderId, OrderStatus};

use crate::config::ShopConfig;
use crate::external::{InMemoryCatalog, InMemoryLedger, InMemoryUserDirectory, RecordingNotifier};
use crate::lifecycle::{
    Backends, InventoryService, LedgerScan, OrderService, PaymentService, Services,
    SubscriptionService,
};
use crate::store::{
    InMemoryInvoiceStore, InMemoryItemStore, InMemoryOrderStore, InMemorySubscriptionStore,
    InvoiceStore, OrderStore,
};

pub(crate) struct TestShop {
    pub user_id: UserId,
    pub config: ShopConfig,
    pub order_store: Arc<InMemoryOrderStore>,
    pub invoices: Arc<InMemoryInvoiceStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<InMemoryLedger>,
    pub services: Services,
    pub inventory: Arc<InventoryService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl TestShop {
    pub fn new() -> Self {
        Self::with_config(ShopConfig::default())
    }

    pub fn with_scan(scan: LedgerScan) -> Self {
        let mut config = ShopConfig::default();
        config.jobs.ledger_page_size = scan.page_size;
        config.jobs.ledger_max_pages = scan.max_pages;
        Self::with_config(config)
    }

    pub fn with_config(config: ShopConfig) -> Self {
        let users = InMemoryUserDirectory::arc();
        let user_id = UserId::new();
        users.register(user_id, "1001").unwrap();
        let notifier = RecordingNotifier::arc();
        let catalog = InMemoryCatalog::arc();
        let ledger = InMemoryLedger::arc();
        let order_store = InMemoryOrderStore::arc();
        let invoices = InMemoryInvoiceStore::arc();

        let services = Services::assemble(
            Backends {
                items: InMemoryItemStore::arc(),
                orders: order_store.clone(),
                invoices: invoices.clone(),
                subscriptions: InMemorySubscriptionStore::arc(),
                catalog: catalog.clone(),
                users,
                notifier: notifier.clone(),
                ledger: ledger.clone(),
            },
            &config,
        );

        Self {
            user_id,
            config,
            order_store,
            invoices,
            catalog,
            notifier,
            ledger,
            inventory: services.inventory.clone(),
            subscriptions: services.subscriptions.clone(),
            orders: services.orders.clone(),
            payments: services.payments.clone(),
            services,
        }
    }

    /// A 100 XTR product with `stock` units on sale. Subscription products
    /// grant 30 seconds.
    pub async fn product(&self, kind: ProductKind, stock: usize) -> ProductId {
        let period =
            (kind == ProductKind::Subscription).then(|| std::time::Duration::from_secs(30));
        let product = Product::new(
            kind,
            "Product",
            "Test product",
            Price::new(Currency::Xtr, dec!(100)).unwrap(),
            period,
            Utc::now(),
        )
        .unwrap();
        let product_id = self.catalog.insert(product).unwrap();
        for n in 0..stock {
            self.inventory
                .stock(product_id, &format!("KEY-{n}"))
                .await
                .unwrap();
        }
        product_id
    }

    pub async fn invoices_state(&self, invoice_id: InvoiceId) -> InvoiceState {
        self.invoices.get_invoice(invoice_id).await.unwrap().state
    }

    pub async fn order_status(&self, order_id: OrderId) -> OrderStatus {
        self.order_store.get_order(order_id).await.unwrap().status
    }
}
