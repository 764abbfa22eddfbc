//! External collaborators consumed by the lifecycle services.
//!
//! The engine only depends on these contracts. The in-memory set and the
//! Telegram Bot API client live here; the Postgres catalog and user directory
//! live in [`crate::db`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use storefront_core::UserId;
use storefront_invoicing::LedgerPage;
use storefront_products::{Product, ProductId};

use crate::error::LifecycleResult;

pub mod deferred;
pub mod in_memory;
pub mod telegram;

pub use deferred::DeferredNotifier;
pub use in_memory::{InMemoryCatalog, InMemoryLedger, InMemoryUserDirectory, RecordingNotifier};
pub use telegram::TelegramBot;

/// Address a notification is routed to (a chat id for Telegram).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(pub String);

impl core::fmt::Display for Recipient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A customer-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Title and body as one text block.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// Contact data resolved from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    pub address: Recipient,
}

/// Customer notification channel.
///
/// Errors are retryable by the next reconciliation cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &Recipient, notification: &Notification) -> LifecycleResult<()>;
}

/// Payment provider ledger, newest first.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn list_transactions(
        &self,
        offset: u32,
        limit: u32,
    ) -> LifecycleResult<LedgerPage>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> LifecycleResult<Contact>;
}

/// Read-only product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, product_id: ProductId) -> LifecycleResult<Product>;
}
