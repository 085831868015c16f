use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rust_decimal::Decimal;

use stockledger_core::{DomainError, DomainResult, ItemId, LotId};
use stockledger_costing::{
    ConversionEvent, ItemHistory, PurchaseLot, SaleUnit, TransactionHistory, WasteEvent,
};

use super::r#trait::{Pricing, Restamp, TransactionStore};

#[derive(Debug, Default)]
struct Tables {
    purchases: BTreeMap<LotId, Vec<PurchaseLot>>,
    sales: BTreeMap<LotId, Vec<SaleUnit>>,
    conversions: BTreeMap<LotId, ConversionEvent>,
    wastes: BTreeMap<LotId, WasteEvent>,
}

impl Tables {
    fn history(&self, item_id: ItemId) -> ItemHistory {
        ItemHistory::new(
            item_id,
            self.purchases.values().flatten().filter(|p| p.item_id() == item_id).cloned(),
            self.sales.values().flatten().filter(|s| s.item_id() == item_id).cloned(),
            self.conversions.values().filter(|c| c.to_item() == item_id).cloned(),
        )
    }
}

fn ensure_one_bill<'a>(lots: impl Iterator<Item = (&'a LotId, ItemId)>) -> DomainResult<&'a LotId> {
    let mut lot: Option<&LotId> = None;
    let mut items = HashSet::new();
    for (line_lot, item_id) in lots {
        match lot {
            None => lot = Some(line_lot),
            Some(l) if l != line_lot => {
                return Err(DomainError::validation(format!(
                    "bill mixes lot identifiers {l} and {line_lot}"
                )));
            }
            Some(_) => {}
        }
        if !items.insert(item_id) {
            return Err(DomainError::validation(format!(
                "bill {line_lot} lists item {item_id} more than once"
            )));
        }
    }
    lot.ok_or_else(|| DomainError::validation("bill has no lines"))
}

/// In-memory transaction store.
///
/// Intended for tests/dev. One lock guards every table, so a history snapshot
/// never observes half of a bill.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    tables: RwLock<Tables>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::invariant("transaction store lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::invariant("transaction store lock poisoned"))
    }
}

impl TransactionHistory for InMemoryTransactionStore {
    fn item_history(&self, item_id: ItemId) -> DomainResult<ItemHistory> {
        Ok(self.read()?.history(item_id))
    }
}

impl TransactionStore for InMemoryTransactionStore {
    fn insert_purchase_bill(&self, lines: Vec<PurchaseLot>) -> DomainResult<()> {
        let lot = ensure_one_bill(lines.iter().map(|l| (l.lot(), l.item_id())))?.clone();
        let mut tables = self.write()?;
        if tables.purchases.contains_key(&lot) {
            return Err(DomainError::conflict(format!("purchase bill {lot} already exists")));
        }
        tables.purchases.insert(lot, lines);
        Ok(())
    }

    fn remove_purchase_bill(&self, lot: &LotId) -> DomainResult<Vec<PurchaseLot>> {
        self.write()?
            .purchases
            .remove(lot)
            .ok_or_else(|| DomainError::not_found(format!("purchase bill {lot}")))
    }

    fn purchase_bill(&self, lot: &LotId) -> DomainResult<Vec<PurchaseLot>> {
        self.read()?
            .purchases
            .get(lot)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("purchase bill {lot}")))
    }

    fn commit_sale_bill<F>(&self, mut lines: Vec<SaleUnit>, mut price: F) -> DomainResult<Vec<SaleUnit>>
    where
        F: FnMut(&ItemHistory, &SaleUnit) -> DomainResult<Pricing>,
    {
        let lot = ensure_one_bill(lines.iter().map(|l| (l.lot(), l.item_id())))?.clone();
        let mut tables = self.write()?;
        if tables.sales.contains_key(&lot) {
            return Err(DomainError::conflict(format!("sale bill {lot} already exists")));
        }

        // Lines of one bill cover distinct items, so pricing one never affects another.
        for line in &mut lines {
            let history = tables.history(line.item_id());
            let (cost_basis, provenance) = price(&history, line)?;
            line.set_cost_basis(cost_basis, provenance);
        }

        tables.sales.insert(lot, lines.clone());
        Ok(lines)
    }

    fn restore_sale_bill(&self, lines: Vec<SaleUnit>) -> DomainResult<()> {
        let lot = ensure_one_bill(lines.iter().map(|l| (l.lot(), l.item_id())))?.clone();
        let mut tables = self.write()?;
        if tables.sales.contains_key(&lot) {
            return Err(DomainError::conflict(format!("sale bill {lot} already exists")));
        }
        tables.sales.insert(lot, lines);
        Ok(())
    }

    fn remove_sale_bill(&self, lot: &LotId) -> DomainResult<Vec<SaleUnit>> {
        self.write()?
            .sales
            .remove(lot)
            .ok_or_else(|| DomainError::not_found(format!("sale bill {lot}")))
    }

    fn sale_bill(&self, lot: &LotId) -> DomainResult<Vec<SaleUnit>> {
        self.read()?
            .sales
            .get(lot)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("sale bill {lot}")))
    }

    fn sales(&self) -> DomainResult<Vec<SaleUnit>> {
        let mut all: Vec<SaleUnit> = self.read()?.sales.values().flatten().cloned().collect();
        all.sort_by(|a, b| {
            a.order_key()
                .cmp(&b.order_key())
                .then_with(|| a.item_id().cmp(&b.item_id()))
        });
        Ok(all)
    }

    fn restamp_sale<F>(&self, item_id: ItemId, lot: &LotId, price: F) -> DomainResult<Restamp>
    where
        F: FnOnce(&ItemHistory, &SaleUnit) -> DomainResult<Pricing>,
    {
        let mut tables = self.write()?;
        let history = tables.history(item_id);
        let line = tables
            .sales
            .get_mut(lot)
            .and_then(|lines| lines.iter_mut().find(|l| l.item_id() == item_id))
            .ok_or_else(|| DomainError::not_found(format!("sale line {lot} for item {item_id}")))?;

        let (current, provenance) = price(&history, line)?;
        let previous = line.set_cost_basis(current, provenance);
        Ok(Restamp {
            previous,
            current,
            provenance,
        })
    }

    fn commit_conversion<F>(&self, mut conversion: ConversionEvent, produced_cost: F) -> DomainResult<ConversionEvent>
    where
        F: FnOnce(&ItemHistory) -> Option<Decimal>,
    {
        let mut tables = self.write()?;
        if tables.conversions.contains_key(conversion.id()) {
            return Err(DomainError::conflict(format!(
                "conversion {} already exists",
                conversion.id()
            )));
        }
        if conversion.produced_unit_cost().is_none() {
            let raw = tables.history(conversion.from_item());
            if let Some(cost) = produced_cost(&raw) {
                conversion.backfill_produced_unit_cost(cost);
            }
        }
        tables
            .conversions
            .insert(conversion.id().clone(), conversion.clone());
        Ok(conversion)
    }

    fn remove_conversion(&self, id: &LotId) -> DomainResult<ConversionEvent> {
        self.write()?
            .conversions
            .remove(id)
            .ok_or_else(|| DomainError::not_found(format!("conversion {id}")))
    }

    fn conversion(&self, id: &LotId) -> DomainResult<ConversionEvent> {
        self.read()?
            .conversions
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("conversion {id}")))
    }

    fn conversions(&self) -> DomainResult<Vec<ConversionEvent>> {
        let mut all: Vec<ConversionEvent> = self.read()?.conversions.values().cloned().collect();
        all.sort_by_key(ConversionEvent::order_key);
        Ok(all)
    }

    fn backfill_conversion_costs<F>(&self, mut produced_cost: F) -> DomainResult<Vec<ConversionEvent>>
    where
        F: FnMut(&ItemHistory, &ConversionEvent) -> Option<Decimal>,
    {
        let mut tables = self.write()?;
        let pending: Vec<LotId> = tables
            .conversions
            .values()
            .filter(|c| c.produced_unit_cost().is_none())
            .map(|c| c.id().clone())
            .collect();

        let mut changed = Vec::new();
        for id in pending {
            let Some(conversion) = tables.conversions.get(&id).cloned() else {
                continue;
            };
            let raw = tables.history(conversion.from_item());
            let Some(cost) = produced_cost(&raw, &conversion) else {
                continue;
            };
            if let Some(stored) = tables.conversions.get_mut(&id) {
                if stored.backfill_produced_unit_cost(cost) {
                    changed.push(stored.clone());
                }
            }
        }
        Ok(changed)
    }

    fn insert_waste(&self, waste: WasteEvent) -> DomainResult<()> {
        let mut tables = self.write()?;
        if tables.wastes.contains_key(waste.id()) {
            return Err(DomainError::conflict(format!("waste record {} already exists", waste.id())));
        }
        tables.wastes.insert(waste.id().clone(), waste);
        Ok(())
    }

    fn remove_waste(&self, id: &LotId) -> DomainResult<WasteEvent> {
        self.write()?
            .wastes
            .remove(id)
            .ok_or_else(|| DomainError::not_found(format!("waste record {id}")))
    }

    fn wastes(&self) -> DomainResult<Vec<WasteEvent>> {
        let mut all: Vec<WasteEvent> = self.read()?.wastes.values().cloned().collect();
        all.sort_by(|a, b| a.recorded_at().cmp(&b.recorded_at()).then_with(|| a.id().cmp(b.id())));
        Ok(all)
    }

    fn references_item(&self, item_id: ItemId) -> DomainResult<bool> {
        let tables = self.read()?;
        Ok(tables.purchases.values().flatten().any(|p| p.item_id() == item_id)
            || tables.sales.values().flatten().any(|s| s.item_id() == item_id)
            || tables
                .conversions
                .values()
                .any(|c| c.from_item() == item_id || c.to_item() == item_id)
            || tables.wastes.values().any(|w| w.item_id() == item_id))
    }
}
