//! Inventory reservation lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use storefront_inventory::{Item, ItemId, ItemStatus};
use storefront_products::ProductId;

use super::RunReport;
use crate::error::LifecycleResult;
use crate::store::ItemStore;

pub struct InventoryService {
    items: Arc<dyn ItemStore>,
    pre_reserve_ttl: Duration,
}

impl InventoryService {
    pub fn new(items: Arc<dyn ItemStore>, pre_reserve_ttl: Duration) -> Self {
        Self {
            items,
            pre_reserve_ttl,
        }
    }

    /// Stock one unit of a product.
    pub async fn stock(&self, product_id: ProductId, payload: &str) -> LifecycleResult<ItemId> {
        let item = Item::stocked(product_id, payload, Utc::now())?;
        let id = self.items.add_item(item).await?;
        tracing::info!(item_id = %id, product_id = %product_id, "item stocked");
        Ok(id)
    }

    /// Withdraw an unsold unit.
    pub async fn withdraw(&self, item_id: ItemId) -> LifecycleResult<()> {
        self.items.remove_item(item_id).await?;
        tracing::info!(item_id = %item_id, "item withdrawn");
        Ok(())
    }

    pub async fn get_item(&self, item_id: ItemId) -> LifecycleResult<Item> {
        self.items.get_item(item_id).await
    }

    pub async fn pre_reserve(&self, product_id: ProductId) -> LifecycleResult<ItemId> {
        self.items.pre_reserve(product_id).await
    }

    pub async fn confirm_reserve(&self, item_id: ItemId) -> LifecycleResult<()> {
        self.items.confirm_reserve(item_id).await
    }

    pub async fn release(&self, item_id: ItemId, held: ItemStatus) -> LifecycleResult<()> {
        self.items.release(item_id, held).await
    }

    /// `Reserved -> Performed`; an item already past `Reserved` on the
    /// delivery path counts as done so fulfilment can be re-run.
    pub async fn mark_performed(&self, item_id: ItemId) -> LifecycleResult<()> {
        match self.items.mark_performed(item_id).await {
            Err(e) if e.is_stale() => {
                let item = self.items.get_item(item_id).await?;
                if matches!(item.status, ItemStatus::Performed | ItemStatus::Realized) {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    pub async fn mark_realized(&self, item_id: ItemId) -> LifecycleResult<()> {
        self.items.mark_realized(item_id).await
    }

    pub async fn count_available(&self, product_id: ProductId) -> LifecycleResult<u64> {
        self.items.count_available(product_id).await
    }

    /// A product is listed while at least one unit is on sale.
    pub async fn is_listed(&self, product_id: ProductId) -> LifecycleResult<bool> {
        Ok(self.count_available(product_id).await? > 0)
    }

    /// Release pre-reservations older than the TTL back to `Sale`.
    pub async fn expire_pre_reservations(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> LifecycleResult<RunReport> {
        let mut report = RunReport::default();
        let expired = self
            .items
            .scan_expired_pre_reserved(batch, now - self.pre_reserve_ttl)
            .await?;

        for item in expired {
            match self.items.release(item.id, ItemStatus::PreReserved).await {
                Ok(()) => {
                    tracing::debug!(item_id = %item.id, "pre-reservation expired");
                    report.processed += 1;
                }
                // Confirmed by its order in the meantime.
                Err(e) if e.is_stale() => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryItemStore;

    fn service() -> InventoryService {
        InventoryService::new(InMemoryItemStore::arc(), Duration::minutes(1))
    }

    #[tokio::test]
    async fn product_is_listed_while_stock_remains() {
        let inventory = service();
        let product = ProductId::new();
        assert!(!inventory.is_listed(product).await.unwrap());

        inventory.stock(product, "KEY-1").await.unwrap();
        assert!(inventory.is_listed(product).await.unwrap());

        inventory.pre_reserve(product).await.unwrap();
        assert!(!inventory.is_listed(product).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_releases_only_stale_holds() {
        let inventory = service();
        let product = ProductId::new();
        inventory.stock(product, "KEY-1").await.unwrap();
        inventory.stock(product, "KEY-2").await.unwrap();
        let expiring = inventory.pre_reserve(product).await.unwrap();
        let confirmed = inventory.pre_reserve(product).await.unwrap();
        inventory.confirm_reserve(confirmed).await.unwrap();

        let report = inventory.expire_pre_reservations(Utc::now(), 30).await.unwrap();
        assert!(report.is_idle());

        let later = Utc::now() + Duration::minutes(2);
        let report = inventory.expire_pre_reservations(later, 30).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(inventory.get_item(expiring).await.unwrap().status, ItemStatus::Sale);
        assert_eq!(inventory.get_item(confirmed).await.unwrap().status, ItemStatus::Reserved);
    }

    #[tokio::test]
    async fn mark_performed_is_repeatable() {
        let inventory = service();
        let product = ProductId::new();
        inventory.stock(product, "KEY-1").await.unwrap();
        let id = inventory.pre_reserve(product).await.unwrap();
        inventory.confirm_reserve(id).await.unwrap();

        inventory.mark_performed(id).await.unwrap();
        inventory.mark_performed(id).await.unwrap();
        inventory.mark_realized(id).await.unwrap();
        inventory.mark_performed(id).await.unwrap();
    }

    #[tokio::test]
    async fn mark_performed_on_released_item_is_stale() {
        let inventory = service();
        let product = ProductId::new();
        inventory.stock(product, "KEY-1").await.unwrap();
        let id = inventory.pre_reserve(product).await.unwrap();
        inventory.release(id, ItemStatus::PreReserved).await.unwrap();

        assert!(inventory.mark_performed(id).await.unwrap_err().is_stale());
    }

    #[tokio::test]
    async fn withdrawn_items_are_gone() {
        let inventory = service();
        let product = ProductId::new();
        let id = inventory.stock(product, "KEY-1").await.unwrap();
        inventory.withdraw(id).await.unwrap();
        assert_eq!(inventory.count_available(product).await.unwrap(), 0);
        assert!(inventory.get_item(id).await.is_err());
    }
}
