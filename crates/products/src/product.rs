use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, Entity, Price, entity_id};

entity_id!(
    /// Product identifier.
    ProductId,
    "product"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Time-limited access; fulfilment opens a subscription.
    Subscription,
    /// One-off deliverable.
    Digital,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Subscription => "subscription",
            ProductKind::Digital => "digital",
        }
    }
}

impl core::str::FromStr for ProductKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(ProductKind::Subscription),
            "digital" => Ok(ProductKind::Digital),
            other => Err(DomainError::validation(format!("unknown product kind: {other}"))),
        }
    }
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub kind: ProductKind,
    pub name: String,
    pub description: String,
    pub price: Price,
    /// Access period granted by a subscription product.
    pub subscription_period: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Build a catalog entry, enforcing that subscription products carry a
    /// non-zero period and other products carry none.
    pub fn new(
        kind: ProductKind,
        name: impl Into<String>,
        description: impl Into<String>,
        price: Price,
        subscription_period: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        match (kind, subscription_period) {
            (ProductKind::Subscription, Some(period)) if !period.is_zero() => {}
            (ProductKind::Subscription, _) => {
                return Err(DomainError::validation(
                    "subscription product requires a positive period",
                ));
            }
            (ProductKind::Digital, Some(_)) => {
                return Err(DomainError::validation(
                    "only subscription products carry a period",
                ));
            }
            (ProductKind::Digital, None) => {}
        }
        Ok(Self {
            id: ProductId::new(),
            kind,
            name,
            description: description.into(),
            price,
            subscription_period,
            created_at: now,
            updated_at: now,
        })
    }

    /// Period to grant on fulfilment, if any.
    pub fn grants_subscription(&self) -> Option<Duration> {
        match self.kind {
            ProductKind::Subscription => self.subscription_period,
            ProductKind::Digital => None,
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

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
    use rust_decimal_macros::dec;
    use storefront_core::Currency;

    fn test_price() -> Price {
        Price::new(Currency::Xtr, dec!(100)).unwrap()
    }

    #[test]
    fn subscription_product_grants_its_period() {
        let product = Product::new(
            ProductKind::Subscription,
            "VPN month",
            "30 days of access",
            test_price(),
            Some(Duration::from_secs(30)),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(product.grants_subscription(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn subscription_without_period_is_rejected() {
        let result = Product::new(
            ProductKind::Subscription,
            "VPN",
            "",
            test_price(),
            Some(Duration::ZERO),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn digital_product_grants_nothing() {
        let product = Product::new(
            ProductKind::Digital,
            "E-book",
            "PDF",
            test_price(),
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(product.grants_subscription(), None);
        assert!(
            Product::new(
                ProductKind::Digital,
                "E-book",
                "PDF",
                test_price(),
                Some(Duration::from_secs(1)),
                Utc::now(),
            )
            .is_err()
        );
    }
}
