use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{
    DomainError, Entity, Pagination, Price, SortOrder, StatusMachine, TimeRange, UserId, entity_id,
};
use storefront_inventory::ItemId;
use storefront_products::ProductId;

entity_id!(
    /// Sales order identifier.
    OrderId,
    "order"
);

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Row exists, reservation not yet confirmed.
    Form,
    ExpectPayments,
    /// A payment attempt has started (provider pre-checkout).
    Handling,
    /// The provider confirmed payment; fulfilment pending.
    Processing,
    Performed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Form => "form",
            OrderStatus::ExpectPayments => "expect_payments",
            OrderStatus::Handling => "handling",
            OrderStatus::Processing => "processing",
            OrderStatus::Performed => "performed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses the TTL reaper may cancel.
    pub const UNPAID: &'static [OrderStatus] = &[OrderStatus::Form, OrderStatus::ExpectPayments];
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

impl StatusMachine for OrderStatus {
    const MACHINE: &'static str = "order";

    const ALL: &'static [Self] = &[
        OrderStatus::Form,
        OrderStatus::ExpectPayments,
        OrderStatus::Handling,
        OrderStatus::Processing,
        OrderStatus::Performed,
        OrderStatus::Cancelled,
    ];

    const TRANSITIONS: &'static [(Self, Self)] = &[
        (OrderStatus::Form, OrderStatus::ExpectPayments),
        (OrderStatus::Form, OrderStatus::Cancelled),
        (OrderStatus::ExpectPayments, OrderStatus::Handling),
        (OrderStatus::ExpectPayments, OrderStatus::Cancelled),
        (OrderStatus::Handling, OrderStatus::Processing),
        (OrderStatus::Handling, OrderStatus::Cancelled),
        (OrderStatus::Processing, OrderStatus::Performed),
    ];
}

/// Persisted order record.
///
/// The item reference is fixed at creation. Product title and description
/// are not stored here; see [`OrderView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub price: Price,
    pub status: OrderStatus,
    /// Deadline after which an unpaid order is reaped.
    pub ttl: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A new order in `Form` against an already pre-reserved item.
    pub fn form(
        user_id: UserId,
        item_id: ItemId,
        product_id: ProductId,
        price: Price,
        time_limit: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if time_limit <= Duration::zero() {
            return Err(DomainError::validation("order time limit must be positive"));
        }
        Ok(Self {
            id: OrderId::new(),
            user_id,
            item_id,
            product_id,
            price,
            status: OrderStatus::Form,
            ttl: now + time_limit,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Ownership check used by every customer-facing read.
    pub fn ensure_owner(&self, user_id: UserId) -> Result<(), DomainError> {
        if self.is_owned_by(user_id) {
            Ok(())
        } else {
            Err(DomainError::Forbidden)
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.ttl
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Product snapshot resolved from the current item and catalog state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProduct {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub title: String,
    pub description: String,
}

/// Order as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub order: Order,
    pub product: OrderProduct,
    /// The item payload, present once the order is `Performed`.
    pub deliverable: Option<String>,
}

/// Order list filter. Empty `statuses` matches every status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub statuses: Vec<OrderStatus>,
    /// Window on the order TTL.
    pub ttl: TimeRange,
    pub user_id: Option<UserId>,
}

impl OrderFilter {
    /// Unpaid orders whose TTL is already behind `now`.
    pub fn expired(now: DateTime<Utc>) -> Self {
        Self {
            statuses: OrderStatus::UNPAID.to_vec(),
            ttl: TimeRange::before(now),
            user_id: None,
        }
    }

    pub fn with_status(status: OrderStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && self.ttl.contains(order.ttl)
            && self.user_id.is_none_or(|user| user == order.user_id)
    }
}

/// Filter, sort (by `created_at`) and page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderListRequest {
    pub filter: OrderFilter,
    pub sort: SortOrder,
    pub page: Pagination,
}
