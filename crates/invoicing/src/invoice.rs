use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{
    DomainError, Entity, Pagination, Price, SortOrder, StatusMachine, TimeRange, entity_id,
};
use storefront_sales::OrderId;

use crate::provider::ProviderId;

entity_id!(
    /// Invoice identifier. Also sent to the provider as the invoice payload.
    InvoiceId,
    "invoice"
);

/// Invoice state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    ExpectPayment,
    Handling,
    Processing,
    Performed,
    Canceled,
    Refunded,
}

impl InvoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceState::ExpectPayment => "expect_payment",
            InvoiceState::Handling => "handling",
            InvoiceState::Processing => "processing",
            InvoiceState::Performed => "performed",
            InvoiceState::Canceled => "canceled",
            InvoiceState::Refunded => "refunded",
        }
    }
}

impl core::fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvoiceState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown invoice state: {s}")))
    }
}

impl StatusMachine for InvoiceState {
    const MACHINE: &'static str = "invoice";

    const ALL: &'static [Self] = &[
        InvoiceState::ExpectPayment,
        InvoiceState::Handling,
        InvoiceState::Processing,
        InvoiceState::Performed,
        InvoiceState::Canceled,
        InvoiceState::Refunded,
    ];

    const TRANSITIONS: &'static [(Self, Self)] = &[
        (InvoiceState::ExpectPayment, InvoiceState::Handling),
        (InvoiceState::ExpectPayment, InvoiceState::Canceled),
        (InvoiceState::Handling, InvoiceState::Processing),
        (InvoiceState::Handling, InvoiceState::Canceled),
        (InvoiceState::Processing, InvoiceState::Performed),
        (InvoiceState::Processing, InvoiceState::Canceled),
        (InvoiceState::Performed, InvoiceState::Refunded),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// In-chat payment through the bot platform.
    Telegram,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Telegram => "telegram",
        }
    }
}

impl core::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(PaymentMethod::Telegram),
            other => Err(DomainError::validation(format!("unknown payment method: {other}"))),
        }
    }
}

/// Persisted invoice record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub order_id: OrderId,
    pub state: InvoiceState,
    pub price: Price,
    pub method: PaymentMethod,
    /// Attached on the move into `Handling` / `Processing`.
    pub provider_id: Option<ProviderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn open(
        order_id: OrderId,
        price: Price,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InvoiceId::new(),
            order_id,
            state: InvoiceState::ExpectPayment,
            price,
            method,
            provider_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Presentation-ready invoice handed to the chat layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub invoice_id: InvoiceId,
    pub order_id: OrderId,
    pub title: String,
    pub description: String,
    pub price: Price,
    pub method: PaymentMethod,
    /// Opaque payload echoed back by the provider in its ledger.
    pub payload: String,
}

/// Invoice list filter. Empty `states` matches every state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFilter {
    pub states: Vec<InvoiceState>,
    /// Window on `updated_at`.
    pub updated: TimeRange,
    pub order_id: Option<OrderId>,
}

impl InvoiceFilter {
    pub fn with_state(state: InvoiceState) -> Self {
        Self {
            states: vec![state],
            ..Self::default()
        }
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        (self.states.is_empty() || self.states.contains(&invoice.state))
            && self.updated.contains(invoice.updated_at)
            && self.order_id.is_none_or(|order| order == invoice.order_id)
    }
}

/// Filter, sort (by `updated_at`) and page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceListRequest {
    pub filter: InvoiceFilter,
    pub sort: SortOrder,
    pub page: Pagination,
}
