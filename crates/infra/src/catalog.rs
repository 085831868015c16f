use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockledger_core::{DomainError, DomainResult, ItemId};
use stockledger_inventory::Item;

/// Item catalog abstraction.
///
/// Reference checks (whether an item may be removed) belong to the caller;
/// the catalog only stores records.
pub trait ItemCatalog: Send + Sync {
    fn get(&self, id: ItemId) -> Option<Item>;
    fn upsert(&self, item: Item);
    fn list(&self) -> Vec<Item>;
    fn remove(&self, id: ItemId) -> Option<Item>;

    fn require(&self, id: ItemId) -> DomainResult<Item> {
        self.get(id).ok_or_else(|| DomainError::item_not_found(id))
    }
}

impl<C> ItemCatalog for Arc<C>
where
    C: ItemCatalog + ?Sized,
{
    fn get(&self, id: ItemId) -> Option<Item> {
        (**self).get(id)
    }

    fn upsert(&self, item: Item) {
        (**self).upsert(item)
    }

    fn list(&self) -> Vec<Item> {
        (**self).list()
    }

    fn remove(&self, id: ItemId) -> Option<Item> {
        (**self).remove(id)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryItemCatalog {
    inner: RwLock<HashMap<ItemId, Item>>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemCatalog for InMemoryItemCatalog {
    fn get(&self, id: ItemId) -> Option<Item> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn upsert(&self, item: Item) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(item.id_typed(), item);
        }
    }

    fn list(&self) -> Vec<Item> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut items: Vec<Item> = map.values().cloned().collect();
        items.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id_typed().cmp(&b.id_typed())));
        items
    }

    fn remove(&self, id: ItemId) -> Option<Item> {
        self.inner.write().ok()?.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_inventory::ItemCategory;

    #[test]
    fn require_reports_missing_item() {
        let catalog = InMemoryItemCatalog::new();
        let item = Item::new(ItemId::new(), "Preform 28mm", ItemCategory::Raw, "pcs").unwrap();
        catalog.upsert(item.clone());

        assert_eq!(catalog.require(item.id_typed()).unwrap(), item);
        assert!(matches!(catalog.require(ItemId::new()), Err(DomainError::ItemNotFound(_))));
        assert_eq!(catalog.list().len(), 1);
        assert!(catalog.remove(item.id_typed()).is_some());
        assert!(catalog.list().is_empty());
    }
}
