//! Transaction records read by the allocator.
//!
//! Purchases, sales, conversions and waste are stored separately from the
//! ledger. Their quantities are mirrored into the ledger as movements; their
//! prices and timestamps drive cost allocation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ItemId, LotId, ensure_positive_quantity};

use crate::allocator::CostProvenance;

/// Total order over transactions of one item: timestamp, then lot identifier.
///
/// Field order matters: the derived `Ord` compares `at` first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub at: DateTime<Utc>,
    pub lot: LotId,
}

impl OrderKey {
    pub fn new(at: DateTime<Utc>, lot: LotId) -> Self {
        Self { at, lot }
    }
}

fn ensure_price(price: Decimal, what: &str) -> DomainResult<()> {
    if price.is_sign_negative() {
        return Err(DomainError::validation(format!("{what} cannot be negative: {price}")));
    }
    Ok(())
}

/// One purchase line (a bill may carry several, one per item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLot {
    item_id: ItemId,
    quantity: i64,
    unit_price: Decimal,
    lot: LotId,
    purchased_at: DateTime<Utc>,
}

impl PurchaseLot {
    pub fn new(
        item_id: ItemId,
        quantity: i64,
        unit_price: Decimal,
        lot: LotId,
        purchased_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive_quantity(quantity, "purchase quantity")?;
        ensure_price(unit_price, "unit price")?;
        Ok(Self {
            item_id,
            quantity,
            unit_price,
            lot,
            purchased_at,
        })
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn lot(&self) -> &LotId {
        &self.lot
    }

    pub fn purchased_at(&self) -> DateTime<Utc> {
        self.purchased_at
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.purchased_at, self.lot.clone())
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// One sale line and its stamped cost basis.
///
/// Only `cost_basis` and `provenance` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleUnit {
    item_id: ItemId,
    quantity: i64,
    unit_price: Decimal,
    lot: LotId,
    sold_at: DateTime<Utc>,
    cost_basis: Option<Decimal>,
    provenance: Option<CostProvenance>,
}

impl SaleUnit {
    pub fn new(
        item_id: ItemId,
        quantity: i64,
        unit_price: Decimal,
        lot: LotId,
        sold_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive_quantity(quantity, "sale quantity")?;
        ensure_price(unit_price, "unit sale price")?;
        Ok(Self {
            item_id,
            quantity,
            unit_price,
            lot,
            sold_at,
            cost_basis: None,
            provenance: None,
        })
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn lot(&self) -> &LotId {
        &self.lot
    }

    pub fn sold_at(&self) -> DateTime<Utc> {
        self.sold_at
    }

    pub fn cost_basis(&self) -> Option<Decimal> {
        self.cost_basis
    }

    pub fn provenance(&self) -> Option<CostProvenance> {
        self.provenance
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.sold_at, self.lot.clone())
    }

    /// Stamp a new cost basis. Returns the previous value.
    pub fn set_cost_basis(&mut self, cost_basis: Decimal, provenance: CostProvenance) -> Option<Decimal> {
        self.provenance = Some(provenance);
        self.cost_basis.replace(cost_basis)
    }

    pub fn revenue(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Cost of goods sold for this line, once a cost basis is stamped.
    pub fn cogs(&self) -> Option<Decimal> {
        self.cost_basis.map(|c| c * Decimal::from(self.quantity))
    }

    pub fn gross_profit(&self) -> Option<Decimal> {
        self.cogs().map(|cogs| self.revenue() - cogs)
    }
}

/// A raw-to-produced conversion ("blow").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEvent {
    id: LotId,
    from_item: ItemId,
    to_item: ItemId,
    input_quantity: i64,
    output_quantity: i64,
    waste_quantity: i64,
    cost_per_unit: Decimal,
    produced_unit_cost: Option<Decimal>,
    efficiency_pct: Decimal,
    converted_at: DateTime<Utc>,
}

/// Fields for [`ConversionEvent::new`].
#[derive(Debug, Clone)]
pub struct NewConversion {
    pub id: LotId,
    pub from_item: ItemId,
    pub to_item: ItemId,
    pub input_quantity: i64,
    pub output_quantity: i64,
    pub waste_quantity: i64,
    pub cost_per_unit: Decimal,
    pub produced_unit_cost: Option<Decimal>,
    pub converted_at: DateTime<Utc>,
}

impl ConversionEvent {
    pub fn new(fields: NewConversion) -> DomainResult<Self> {
        if fields.from_item == fields.to_item {
            return Err(DomainError::validation(
                "conversion must produce a different item than it consumes",
            ));
        }
        ensure_positive_quantity(fields.input_quantity, "conversion input")?;
        ensure_positive_quantity(fields.output_quantity, "conversion output")?;
        if fields.waste_quantity < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "conversion waste cannot be negative: {}",
                fields.waste_quantity
            )));
        }
        if fields.output_quantity.checked_add(fields.waste_quantity) != Some(fields.input_quantity) {
            return Err(DomainError::validation(format!(
                "conversion input ({}) must equal output ({}) + waste ({})",
                fields.input_quantity, fields.output_quantity, fields.waste_quantity
            )));
        }
        ensure_price(fields.cost_per_unit, "conversion cost per unit")?;

        let efficiency_pct = (Decimal::from(fields.output_quantity) * Decimal::ONE_HUNDRED
            / Decimal::from(fields.input_quantity))
        .round_dp(2);

        Ok(Self {
            id: fields.id,
            from_item: fields.from_item,
            to_item: fields.to_item,
            input_quantity: fields.input_quantity,
            output_quantity: fields.output_quantity,
            waste_quantity: fields.waste_quantity,
            cost_per_unit: fields.cost_per_unit,
            produced_unit_cost: fields.produced_unit_cost,
            efficiency_pct,
            converted_at: fields.converted_at,
        })
    }

    pub fn id(&self) -> &LotId {
        &self.id
    }

    pub fn from_item(&self) -> ItemId {
        self.from_item
    }

    pub fn to_item(&self) -> ItemId {
        self.to_item
    }

    pub fn input_quantity(&self) -> i64 {
        self.input_quantity
    }

    pub fn output_quantity(&self) -> i64 {
        self.output_quantity
    }

    pub fn waste_quantity(&self) -> i64 {
        self.waste_quantity
    }

    pub fn cost_per_unit(&self) -> Decimal {
        self.cost_per_unit
    }

    pub fn produced_unit_cost(&self) -> Option<Decimal> {
        self.produced_unit_cost
    }

    pub fn efficiency_pct(&self) -> Decimal {
        self.efficiency_pct
    }

    pub fn converted_at(&self) -> DateTime<Utc> {
        self.converted_at
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.converted_at, self.id.clone())
    }

    /// Fill a missing produced cost. Existing values are kept; returns whether
    /// anything changed.
    pub fn backfill_produced_unit_cost(&mut self, cost: Decimal) -> bool {
        if self.produced_unit_cost.is_some() {
            return false;
        }
        self.produced_unit_cost = Some(cost);
        true
    }
}

/// Stock written off outside a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasteEvent {
    id: LotId,
    item_id: ItemId,
    quantity: i64,
    price_per_unit: Decimal,
    recorded_at: DateTime<Utc>,
}

impl WasteEvent {
    pub fn new(
        id: LotId,
        item_id: ItemId,
        quantity: i64,
        price_per_unit: Decimal,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive_quantity(quantity, "waste quantity")?;
        ensure_price(price_per_unit, "waste price per unit")?;
        Ok(Self {
            id,
            item_id,
            quantity,
            price_per_unit,
            recorded_at,
        })
    }

    pub fn id(&self) -> &LotId {
        &self.id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn price_per_unit(&self) -> Decimal {
        self.price_per_unit
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Written-off value.
    pub fn value(&self) -> Decimal {
        self.price_per_unit * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn lot(s: &str) -> LotId {
        LotId::new(s).unwrap()
    }

    #[test]
    fn order_key_breaks_ties_by_lot() {
        let a = OrderKey::new(at(1), lot("PB-10"));
        let b = OrderKey::new(at(1), lot("PB-9"));
        let c = OrderKey::new(at(2), lot("PB-1"));
        // Lexicographic on the identifier, as stored.
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn purchase_rejects_bad_input() {
        assert!(matches!(
            PurchaseLot::new(ItemId::new(), 0, dec!(1), lot("PB-1"), at(1)),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert!(matches!(
            PurchaseLot::new(ItemId::new(), 5, dec!(-1), lot("PB-1"), at(1)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn sale_profit_needs_cost_basis() {
        let mut sale = SaleUnit::new(ItemId::new(), 10, dec!(100), lot("SB-1"), at(3)).unwrap();
        assert_eq!(sale.cogs(), None);

        let previous = sale.set_cost_basis(dec!(60.00), CostProvenance::NoPurchaseHistory);

        assert_eq!(previous, None);
        assert_eq!(sale.cogs(), Some(dec!(600.00)));
        assert_eq!(sale.gross_profit(), Some(dec!(400.00)));
        assert_eq!(sale.set_cost_basis(dec!(55), CostProvenance::Fifo), Some(dec!(60.00)));
    }

    fn conversion(input: i64, output: i64, waste: i64) -> DomainResult<ConversionEvent> {
        ConversionEvent::new(NewConversion {
            id: lot("BLOW-1"),
            from_item: ItemId::new(),
            to_item: ItemId::new(),
            input_quantity: input,
            output_quantity: output,
            waste_quantity: waste,
            cost_per_unit: dec!(2),
            produced_unit_cost: None,
            converted_at: at(4),
        })
    }

    #[test]
    fn conversion_must_conserve_quantity() {
        let ok = conversion(1000, 950, 50).unwrap();
        assert_eq!(ok.efficiency_pct(), dec!(95.00));

        assert!(matches!(conversion(1000, 960, 50), Err(DomainError::Validation(_))));
        assert!(matches!(conversion(1000, 1000, -1), Err(DomainError::InvalidQuantity(_))));
        assert!(matches!(conversion(0, 0, 0), Err(DomainError::InvalidQuantity(_))));
    }

    #[test]
    fn conservation_check_does_not_overflow() {
        assert!(matches!(
            conversion(i64::MAX, i64::MAX, 1),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            conversion(10, i64::MAX, i64::MAX),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn backfill_never_overwrites() {
        let mut c = conversion(100, 95, 5).unwrap();
        assert!(c.backfill_produced_unit_cost(dec!(22)));
        assert!(!c.backfill_produced_unit_cost(dec!(30)));
        assert_eq!(c.produced_unit_cost(), Some(dec!(22)));
    }

    #[test]
    fn waste_value() {
        let w = WasteEvent::new(lot("W-1"), ItemId::new(), 12, dec!(1.5), at(6)).unwrap();
        assert_eq!(w.value(), dec!(18.0));
    }
}
