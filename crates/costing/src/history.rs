use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockledger_core::{DomainResult, ItemId};

use crate::records::{ConversionEvent, PurchaseLot, SaleUnit};

/// Consistent snapshot of everything the allocator reads for one item.
///
/// Purchases and sales are sorted by [`OrderKey`](crate::OrderKey); conversions
/// producing the item are sorted by their own key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemHistory {
    item_id: ItemId,
    purchases: Vec<PurchaseLot>,
    sales: Vec<SaleUnit>,
    conversions_in: Vec<ConversionEvent>,
}

impl ItemHistory {
    /// Build a snapshot. Records belonging to other items are dropped.
    pub fn new(
        item_id: ItemId,
        purchases: impl IntoIterator<Item = PurchaseLot>,
        sales: impl IntoIterator<Item = SaleUnit>,
        conversions: impl IntoIterator<Item = ConversionEvent>,
    ) -> Self {
        let mut purchases: Vec<PurchaseLot> =
            purchases.into_iter().filter(|p| p.item_id() == item_id).collect();
        purchases.sort_by_key(PurchaseLot::order_key);

        let mut sales: Vec<SaleUnit> = sales.into_iter().filter(|s| s.item_id() == item_id).collect();
        sales.sort_by_key(SaleUnit::order_key);

        let mut conversions_in: Vec<ConversionEvent> =
            conversions.into_iter().filter(|c| c.to_item() == item_id).collect();
        conversions_in.sort_by_key(ConversionEvent::order_key);

        Self {
            item_id,
            purchases,
            sales,
            conversions_in,
        }
    }

    pub fn empty(item_id: ItemId) -> Self {
        Self {
            item_id,
            ..Self::default()
        }
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The FIFO consumption queue, oldest first.
    pub fn purchases(&self) -> &[PurchaseLot] {
        &self.purchases
    }

    pub fn sales(&self) -> &[SaleUnit] {
        &self.sales
    }

    /// Conversions whose output is this item.
    pub fn conversions_in(&self) -> &[ConversionEvent] {
        &self.conversions_in
    }

    pub fn latest_purchase_at_or_before(&self, at: DateTime<Utc>) -> Option<&PurchaseLot> {
        self.purchases.iter().rev().find(|p| p.purchased_at() <= at)
    }

    /// Most recent conversion into this item that carries a produced cost.
    ///
    /// With `at` set, conversions after that instant are ignored.
    pub fn latest_produced_cost(
        &self,
        at: Option<DateTime<Utc>>,
    ) -> Option<(&ConversionEvent, Decimal)> {
        self.conversions_in
            .iter()
            .rev()
            .filter(|c| at.is_none_or(|at| c.converted_at() <= at))
            .find_map(|c| c.produced_unit_cost().map(|cost| (c, cost)))
    }
}

/// Read access to stored transactions.
///
/// Implementations must return a snapshot taken under one consistent read:
/// a concurrently committed bill is either fully visible or not at all.
pub trait TransactionHistory {
    fn item_history(&self, item_id: ItemId) -> DomainResult<ItemHistory>;
}

impl<H> TransactionHistory for Arc<H>
where
    H: TransactionHistory + ?Sized,
{
    fn item_history(&self, item_id: ItemId) -> DomainResult<ItemHistory> {
        (**self).item_history(item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NewConversion;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use stockledger_core::LotId;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, day, 9, 0, 0).unwrap()
    }

    fn purchase(item: ItemId, lot: &str, day: u32, price: Decimal) -> PurchaseLot {
        PurchaseLot::new(item, 10, price, LotId::new(lot).unwrap(), at(day)).unwrap()
    }

    fn conversion(to: ItemId, id: &str, day: u32, cost: Option<Decimal>) -> ConversionEvent {
        ConversionEvent::new(NewConversion {
            id: LotId::new(id).unwrap(),
            from_item: ItemId::new(),
            to_item: to,
            input_quantity: 100,
            output_quantity: 95,
            waste_quantity: 5,
            cost_per_unit: dec!(2),
            produced_unit_cost: cost,
            converted_at: at(day),
        })
        .unwrap()
    }

    #[test]
    fn snapshot_is_filtered_and_sorted() {
        let item = ItemId::new();
        let history = ItemHistory::new(
            item,
            vec![
                purchase(item, "PB-2", 3, dec!(21)),
                purchase(ItemId::new(), "PB-X", 1, dec!(1)),
                purchase(item, "PB-1", 3, dec!(20)),
                purchase(item, "PB-0", 5, dec!(19)),
            ],
            vec![],
            vec![],
        );

        let lots: Vec<&str> = history.purchases().iter().map(|p| p.lot().as_str()).collect();
        assert_eq!(lots, ["PB-1", "PB-2", "PB-0"]);
        assert_eq!(history.latest_purchase_at_or_before(at(4)).unwrap().lot().as_str(), "PB-2");
        assert!(history.latest_purchase_at_or_before(at(2)).is_none());
    }

    #[test]
    fn produced_cost_skips_unpriced_and_future_conversions() {
        let item = ItemId::new();
        let history = ItemHistory::new(
            item,
            vec![],
            vec![],
            vec![
                conversion(item, "BLOW-1", 1, Some(dec!(22))),
                conversion(item, "BLOW-2", 4, None),
                conversion(item, "BLOW-3", 9, Some(dec!(25))),
            ],
        );

        assert_eq!(history.latest_produced_cost(None).unwrap().1, dec!(25));
        let (c, cost) = history.latest_produced_cost(Some(at(6))).unwrap();
        assert_eq!(c.id().as_str(), "BLOW-1");
        assert_eq!(cost, dec!(22));
    }
}
