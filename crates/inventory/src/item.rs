use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, Entity, StatusMachine, entity_id};
use storefront_products::ProductId;

entity_id!(
    /// Inventory item identifier.
    ItemId,
    "item"
);

/// Inventory item status.
///
/// `Sale` items are free stock. A reservation starts as a short-lived
/// `PreReserved` hold, becomes `Reserved` once an order commits to it, and
/// `Performed`/`Realized` once paid for and delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Sale,
    PreReserved,
    Reserved,
    Performed,
    Realized,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Sale => "sale",
            ItemStatus::PreReserved => "pre_reserved",
            ItemStatus::Reserved => "reserved",
            ItemStatus::Performed => "performed",
            ItemStatus::Realized => "realized",
        }
    }

    /// Whether an order currently holds the item.
    pub fn is_held(&self) -> bool {
        matches!(self, ItemStatus::PreReserved | ItemStatus::Reserved)
    }
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown item status: {s}")))
    }
}

impl StatusMachine for ItemStatus {
    const MACHINE: &'static str = "item";

    const ALL: &'static [Self] = &[
        ItemStatus::Sale,
        ItemStatus::PreReserved,
        ItemStatus::Reserved,
        ItemStatus::Performed,
        ItemStatus::Realized,
    ];

    const TRANSITIONS: &'static [(Self, Self)] = &[
        (ItemStatus::Sale, ItemStatus::PreReserved),
        (ItemStatus::PreReserved, ItemStatus::Reserved),
        (ItemStatus::PreReserved, ItemStatus::Sale),
        (ItemStatus::Reserved, ItemStatus::Performed),
        (ItemStatus::Reserved, ItemStatus::Sale),
        (ItemStatus::Performed, ItemStatus::Realized),
    ];
}

/// A single sellable unit of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub product_id: ProductId,
    pub status: ItemStatus,
    /// The deliverable (license key, access link, ...). Opaque to the engine.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// A freshly stocked item, available for sale.
    pub fn stocked(
        product_id: ProductId,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let payload = payload.into();
        if payload.trim().is_empty() {
            return Err(DomainError::validation("item payload cannot be empty"));
        }
        Ok(Self {
            id: ItemId::new(),
            product_id,
            status: ItemStatus::Sale,
            payload,
            created_at: now,
            updated_at: now,
        })
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::Transition;

    #[test]
    fn stocked_items_start_on_sale() {
        let item = Item::stocked(ProductId::new(), "KEY-123", Utc::now()).unwrap();
        assert_eq!(item.status, ItemStatus::Sale);
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn blank_payload_is_rejected() {
        let err = Item::stocked(ProductId::new(), "   ", Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reservation_path_is_allowed() {
        let path = [
            ItemStatus::Sale,
            ItemStatus::PreReserved,
            ItemStatus::Reserved,
            ItemStatus::Performed,
            ItemStatus::Realized,
        ];
        for pair in path.windows(2) {
            assert!(Transition::request(pair[0], pair[1]).is_ok(), "{:?}", pair);
        }
        assert!(ItemStatus::Realized.is_terminal());
    }

    #[test]
    fn holds_can_be_released_but_delivery_cannot() {
        assert!(ItemStatus::PreReserved.can_transition(ItemStatus::Sale));
        assert!(ItemStatus::Reserved.can_transition(ItemStatus::Sale));
        assert!(!ItemStatus::Performed.can_transition(ItemStatus::Sale));
        assert!(!ItemStatus::Sale.can_transition(ItemStatus::Reserved));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), *status);
        }
        assert!("sold".parse::<ItemStatus>().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = ItemStatus> {
            proptest::sample::select(ItemStatus::ALL.to_vec())
        }

        proptest! {
            /// Property: only table pairs are accepted; identity is a no-op signal.
            #[test]
            fn request_matches_table(from in any_status(), to in any_status()) {
                let result = Transition::request(from, to);
                if from == to {
                    let is_equal = matches!(result, Err(DomainError::EqualState { .. }));
                    prop_assert!(is_equal);
                } else if ItemStatus::TRANSITIONS.contains(&(from, to)) {
                    prop_assert!(result.is_ok());
                } else {
                    let is_illegal = matches!(result, Err(DomainError::IllegalTransition { .. }));
                    prop_assert!(is_illegal);
                }
            }
        }
    }
}
