//! In-memory collaborators for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use storefront_core::{DomainError, UserId};
use storefront_invoicing::{LedgerPage, ProviderTransaction};
use storefront_products::{Product, ProductId};

use super::{Contact, Notification, Notifier, PaymentProvider, ProductCatalog, Recipient, UserDirectory};
use crate::error::{LifecycleError, LifecycleResult};

fn poisoned(what: &str) -> LifecycleError {
    LifecycleError::storage("lock", format!("{what} poisoned"))
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, product: Product) -> LifecycleResult<ProductId> {
        let id = product.id;
        self.products
            .write()
            .map_err(|_| poisoned("catalog"))?
            .insert(id, product);
        Ok(id)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn get_product(&self, product_id: ProductId) -> LifecycleResult<Product> {
        self.products
            .read()
            .map_err(|_| poisoned("catalog"))?
            .get(&product_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(ProductId::LABEL, product_id).into())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, Recipient>>,
}

impl InMemoryUserDirectory {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, user_id: UserId, address: impl Into<String>) -> LifecycleResult<()> {
        self.users
            .write()
            .map_err(|_| poisoned("user directory"))?
            .insert(user_id, Recipient(address.into()));
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: UserId) -> LifecycleResult<Contact> {
        let users = self.users.read().map_err(|_| poisoned("user directory"))?;
        let address = users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("user", user_id))?;
        Ok(Contact { user_id, address })
    }
}

/// Notifier that keeps every delivered message. Can be switched to failing.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Recipient, Notification)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(Recipient, Notification)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Messages whose title or body mentions `needle`.
    pub fn sent_matching(&self, needle: &str) -> usize {
        self.sent()
            .iter()
            .filter(|(_, n)| n.title.contains(needle) || n.body.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &Recipient, notification: &Notification) -> LifecycleResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LifecycleError::Notification("channel refused message".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| poisoned("notifier"))?
            .push((recipient.clone(), notification.clone()));
        Ok(())
    }
}

/// Scripted provider ledger.
///
/// Entries are served in insertion order, which tests treat as "newest
/// first"; inserting out of time order simulates a badly ordered ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    /// `None` stands for an entry the provider returned but could not be read.
    entries: RwLock<Vec<Option<ProviderTransaction>>>,
    failing: AtomicBool,
    requests: AtomicUsize,
}

impl InMemoryLedger {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, tx: ProviderTransaction) -> LifecycleResult<()> {
        self.entries.write().map_err(|_| poisoned("ledger"))?.push(Some(tx));
        Ok(())
    }

    pub fn push_unreadable(&self) -> LifecycleResult<()> {
        self.entries.write().map_err(|_| poisoned("ledger"))?.push(None);
        Ok(())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of page requests served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for InMemoryLedger {
    async fn list_transactions(
        &self,
        offset: u32,
        limit: u32,
    ) -> LifecycleResult<LedgerPage> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LifecycleError::ProviderUnavailable("ledger offline".to_string()));
        }
        let entries = self.entries.read().map_err(|_| poisoned("ledger"))?;
        let raw: Vec<_> = entries
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(LedgerPage {
            fetched: raw.len(),
            transactions: raw.into_iter().flatten().cloned().collect(),
        })
    }
}
