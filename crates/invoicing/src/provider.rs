//! Payment-provider records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::DomainError;

use crate::invoice::InvoiceId;

/// Provider-side charge identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("provider id cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProviderId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0
    }
}

impl core::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the provider ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTransaction {
    /// Raw provider charge id; may be empty for refunds or malformed entries.
    pub provider_tx_id: String,
    /// Invoice the charge was made for, if the payload parsed.
    pub invoice_id: Option<InvoiceId>,
    pub occurred_at: DateTime<Utc>,
}

impl ProviderTransaction {
    /// The provider id, when usable for settlement.
    pub fn provider_id(&self) -> Option<ProviderId> {
        ProviderId::new(self.provider_tx_id.clone()).ok()
    }

    /// Whether this entry settles `invoice`.
    pub fn settles(&self, invoice: InvoiceId) -> bool {
        self.invoice_id == Some(invoice) && !self.provider_tx_id.trim().is_empty()
    }
}

/// One page of the provider ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub transactions: Vec<ProviderTransaction>,
    /// Entries the provider returned, including ones that could not be read.
    /// Only a short `fetched` count marks the end of the ledger.
    pub fetched: usize,
}
