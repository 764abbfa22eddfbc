//! Notifier handle that is bound after construction.
//!
//! Services are built before the bot client that delivers their messages.
//! They receive a [`DeferredNotifier`]; the process binds the real channel
//! exactly once when it exists. Until then every send fails with a
//! notification error.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::{Notification, Notifier, Recipient};
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Default)]
pub struct DeferredNotifier {
    inner: OnceLock<Arc<dyn Notifier>>,
}

impl DeferredNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Bind the real channel. A second bind is rejected.
    pub fn bind(&self, notifier: Arc<dyn Notifier>) -> LifecycleResult<()> {
        self.inner
            .set(notifier)
            .map_err(|_| LifecycleError::Config("notifier already bound".to_string()))
    }

    pub fn is_bound(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl core::fmt::Debug for DeferredNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeferredNotifier")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[async_trait]
impl Notifier for DeferredNotifier {
    async fn send(&self, recipient: &Recipient, notification: &Notification) -> LifecycleResult<()> {
        match self.inner.get() {
            Some(notifier) => notifier.send(recipient, notification).await,
            None => Err(LifecycleError::Notification(
                "notification channel is not bound yet".to_string(),
            )),
        }
    }
}
