use std::sync::Arc;

use rust_decimal::Decimal;

use stockledger_core::{DomainResult, ItemId, LotId};
use stockledger_costing::{
    ConversionEvent, CostProvenance, ItemHistory, PurchaseLot, SaleUnit, TransactionHistory,
    WasteEvent,
};

/// Cost decision for one sale line, made against a history snapshot.
pub type Pricing = (Decimal, CostProvenance);

/// Old and new cost basis of a restamped sale line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restamp {
    pub previous: Option<Decimal>,
    pub current: Decimal,
    pub provenance: CostProvenance,
}

impl Restamp {
    pub fn changed(&self) -> bool {
        self.previous != Some(self.current)
    }
}

/// Storage for purchase, sale, conversion and waste records.
///
/// Each bill is keyed by its lot identifier; purchase, sale, conversion and
/// waste identifiers live in separate namespaces. Methods that take a pricing
/// closure run it under the store's write lock so the history it sees cannot
/// change before the result is stored.
pub trait TransactionStore: TransactionHistory + Send + Sync {
    /// Insert every line of a purchase bill. `Conflict` if the bill exists.
    fn insert_purchase_bill(&self, lines: Vec<PurchaseLot>) -> DomainResult<()>;

    /// Remove a purchase bill, returning its lines. `NotFound` if absent.
    fn remove_purchase_bill(&self, lot: &LotId) -> DomainResult<Vec<PurchaseLot>>;

    fn purchase_bill(&self, lot: &LotId) -> DomainResult<Vec<PurchaseLot>>;

    /// Price and insert the lines of a sale bill in one step.
    fn commit_sale_bill<F>(&self, lines: Vec<SaleUnit>, price: F) -> DomainResult<Vec<SaleUnit>>
    where
        F: FnMut(&ItemHistory, &SaleUnit) -> DomainResult<Pricing>;

    /// Put back previously removed sale lines unchanged.
    fn restore_sale_bill(&self, lines: Vec<SaleUnit>) -> DomainResult<()>;

    fn remove_sale_bill(&self, lot: &LotId) -> DomainResult<Vec<SaleUnit>>;

    fn sale_bill(&self, lot: &LotId) -> DomainResult<Vec<SaleUnit>>;

    /// Every sale line, ordered by `(timestamp, lot)`.
    fn sales(&self) -> DomainResult<Vec<SaleUnit>>;

    /// Recompute and store one sale line's cost basis atomically.
    fn restamp_sale<F>(&self, item_id: ItemId, lot: &LotId, price: F) -> DomainResult<Restamp>
    where
        F: FnOnce(&ItemHistory, &SaleUnit) -> DomainResult<Pricing>;

    /// Insert a conversion, filling its produced cost from the raw item's history.
    fn commit_conversion<F>(&self, conversion: ConversionEvent, produced_cost: F) -> DomainResult<ConversionEvent>
    where
        F: FnOnce(&ItemHistory) -> Option<Decimal>;

    fn remove_conversion(&self, id: &LotId) -> DomainResult<ConversionEvent>;

    fn conversion(&self, id: &LotId) -> DomainResult<ConversionEvent>;

    /// Every conversion, ordered by `(timestamp, id)`.
    fn conversions(&self) -> DomainResult<Vec<ConversionEvent>>;

    /// Fill missing produced costs. Returns the conversions that changed.
    fn backfill_conversion_costs<F>(&self, produced_cost: F) -> DomainResult<Vec<ConversionEvent>>
    where
        F: FnMut(&ItemHistory, &ConversionEvent) -> Option<Decimal>;

    fn insert_waste(&self, waste: WasteEvent) -> DomainResult<()>;

    fn remove_waste(&self, id: &LotId) -> DomainResult<WasteEvent>;

    fn wastes(&self) -> DomainResult<Vec<WasteEvent>>;

    /// Whether any stored record mentions the item.
    fn references_item(&self, item_id: ItemId) -> DomainResult<bool>;
}

impl<S> TransactionStore for Arc<S>
where
    S: TransactionStore + ?Sized,
{
    fn insert_purchase_bill(&self, lines: Vec<PurchaseLot>) -> DomainResult<()> {
        (**self).insert_purchase_bill(lines)
    }

    fn remove_purchase_bill(&self, lot: &LotId) -> DomainResult<Vec<PurchaseLot>> {
        (**self).remove_purchase_bill(lot)
    }

    fn purchase_bill(&self, lot: &LotId) -> DomainResult<Vec<PurchaseLot>> {
        (**self).purchase_bill(lot)
    }

    fn commit_sale_bill<F>(&self, lines: Vec<SaleUnit>, price: F) -> DomainResult<Vec<SaleUnit>>
    where
        F: FnMut(&ItemHistory, &SaleUnit) -> DomainResult<Pricing>,
    {
        (**self).commit_sale_bill(lines, price)
    }

    fn restore_sale_bill(&self, lines: Vec<SaleUnit>) -> DomainResult<()> {
        (**self).restore_sale_bill(lines)
    }

    fn remove_sale_bill(&self, lot: &LotId) -> DomainResult<Vec<SaleUnit>> {
        (**self).remove_sale_bill(lot)
    }

    fn sale_bill(&self, lot: &LotId) -> DomainResult<Vec<SaleUnit>> {
        (**self).sale_bill(lot)
    }

    fn sales(&self) -> DomainResult<Vec<SaleUnit>> {
        (**self).sales()
    }

    fn restamp_sale<F>(&self, item_id: ItemId, lot: &LotId, price: F) -> DomainResult<Restamp>
    where
        F: FnOnce(&ItemHistory, &SaleUnit) -> DomainResult<Pricing>,
    {
        (**self).restamp_sale(item_id, lot, price)
    }

    fn commit_conversion<F>(&self, conversion: ConversionEvent, produced_cost: F) -> DomainResult<ConversionEvent>
    where
        F: FnOnce(&ItemHistory) -> Option<Decimal>,
    {
        (**self).commit_conversion(conversion, produced_cost)
    }

    fn remove_conversion(&self, id: &LotId) -> DomainResult<ConversionEvent> {
        (**self).remove_conversion(id)
    }

    fn conversion(&self, id: &LotId) -> DomainResult<ConversionEvent> {
        (**self).conversion(id)
    }

    fn conversions(&self) -> DomainResult<Vec<ConversionEvent>> {
        (**self).conversions()
    }

    fn backfill_conversion_costs<F>(&self, produced_cost: F) -> DomainResult<Vec<ConversionEvent>>
    where
        F: FnMut(&ItemHistory, &ConversionEvent) -> Option<Decimal>,
    {
        (**self).backfill_conversion_costs(produced_cost)
    }

    fn insert_waste(&self, waste: WasteEvent) -> DomainResult<()> {
        (**self).insert_waste(waste)
    }

    fn remove_waste(&self, id: &LotId) -> DomainResult<WasteEvent> {
        (**self).remove_waste(id)
    }

    fn wastes(&self) -> DomainResult<Vec<WasteEvent>> {
        (**self).wastes()
    }

    fn references_item(&self, item_id: ItemId) -> DomainResult<bool> {
        (**self).references_item(item_id)
    }
}
