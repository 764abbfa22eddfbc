use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, Entity, StatusMachine, TimeRange, UserId, entity_id};
use storefront_sales::OrderId;

entity_id!(
    /// Subscription identifier.
    SubscriptionId,
    "subscription"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Active,
    Inactive,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Inactive => "inactive",
        }
    }
}

impl core::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SubscriptionState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionState::Active),
            "inactive" => Ok(SubscriptionState::Inactive),
            other => Err(DomainError::validation(format!(
                "unknown subscription state: {other}"
            ))),
        }
    }
}

impl StatusMachine for SubscriptionState {
    const MACHINE: &'static str = "subscription";
    const ALL: &'static [Self] = &[SubscriptionState::Active, SubscriptionState::Inactive];
    const TRANSITIONS: &'static [(Self, Self)] =
        &[(SubscriptionState::Active, SubscriptionState::Inactive)];
}

/// Time-limited access granted by a fulfilled order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    /// At most one subscription exists per order.
    pub order_id: OrderId,
    pub description: String,
    pub state: SubscriptionState,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A subscription is always opened `Active`, running for `period` from `now`.
    pub fn open(
        user_id: UserId,
        order_id: OrderId,
        description: impl Into<String>,
        period: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if period <= Duration::zero() {
            return Err(DomainError::validation("subscription period must be positive"));
        }
        Ok(Self {
            id: SubscriptionId::new(),
            user_id,
            order_id,
            description: description.into(),
            state: SubscriptionState::Active,
            deadline: now + period,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

impl Entity for Subscription {
    type Id = SubscriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Subscription list filter. Empty `states` matches every state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub states: Vec<SubscriptionState>,
    /// Window on the deadline.
    pub deadline: TimeRange,
    pub user_id: Option<UserId>,
}

impl SubscriptionFilter {
    /// Active subscriptions whose deadline is already behind `now`.
    pub fn expired(now: DateTime<Utc>) -> Self {
        Self {
            states: vec![SubscriptionState::Active],
            deadline: TimeRange::before(now),
            user_id: None,
        }
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, subscription: &Subscription) -> bool {
        (self.states.is_empty() || self.states.contains(&subscription.state))
            && self.deadline.contains(subscription.deadline)
            && self.user_id.is_none_or(|user| user == subscription.user_id)
    }
}
