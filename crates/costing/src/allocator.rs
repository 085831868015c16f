//! FIFO cost allocator.
//!
//! Given an item's history and a target sale, replays prior sales against the
//! purchase queue (oldest lot first) and prices the target from whatever is
//! left. Conversion outputs short-circuit to their produced cost. Selling with
//! no purchase history, or beyond it, is priced at a conservative fraction of
//! the sale price and reported through [`CostProvenance`] rather than as an error.
//!
//! Allocation is a pure function of the history snapshot and the request.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};
use stockledger_core::{DomainError, DomainResult, ItemId, LotId, ensure_positive_quantity};

use crate::history::ItemHistory;
use crate::records::OrderKey;

/// 0.6: fraction of the sale price used for unpriced units.
pub const DEFAULT_CONSERVATIVE_RATIO: Decimal = Decimal::from_parts(6, 0, 0, false, 1);

/// Decimal places kept on a stored cost basis.
pub const DEFAULT_COST_SCALE: u32 = 2;

/// How a cost basis was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostProvenance {
    /// Taken from the latest conversion producing the item.
    ProducedCost,
    /// Fully covered by purchase lots.
    Fifo,
    /// Purchase lots ran out; the remainder was priced conservatively.
    FifoWithShortage,
    /// The item has never been purchased; priced conservatively.
    NoPurchaseHistory,
}

impl CostProvenance {
    /// Whether any part of the cost came from the conservative ratio.
    pub fn is_conservative(self) -> bool {
        matches!(self, CostProvenance::FifoWithShortage | CostProvenance::NoPurchaseHistory)
    }
}

/// Units drawn from one purchase lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot: LotId,
    pub purchased_at: DateTime<Utc>,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl LotDraw {
    pub fn cost(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Allocator output, at full precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAllocation {
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub provenance: CostProvenance,
    pub draws: Vec<LotDraw>,
    /// Units not covered by any purchase lot.
    pub shortage: i64,
    /// Conversion whose produced cost was used, if any.
    pub source_conversion: Option<LotId>,
}

impl CostAllocation {
    /// `unit_cost` rounded half away from zero to `scale` places.
    pub fn rounded_unit_cost(&self, scale: u32) -> Decimal {
        round_cost(self.unit_cost, scale)
    }
}

pub fn round_cost(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// What to price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_sale_price: Decimal,
    /// Sale lot to leave out of the prior-sales replay (its own stored line).
    pub exclude_lot: Option<LotId>,
    /// Position of the target sale. When set, only sales ordered strictly
    /// before it count as prior, and only conversions at or before it apply.
    pub position: Option<OrderKey>,
}

impl AllocationRequest {
    pub fn new(item_id: ItemId, quantity: i64, unit_sale_price: Decimal) -> Self {
        Self {
            item_id,
            quantity,
            unit_sale_price,
            exclude_lot: None,
            position: None,
        }
    }

    pub fn excluding(mut self, lot: LotId) -> Self {
        self.exclude_lot = Some(lot);
        self
    }

    pub fn at(mut self, position: OrderKey) -> Self {
        self.position = Some(position);
        self
    }

    fn counts_as_prior(&self, key: &OrderKey) -> bool {
        if self.exclude_lot.as_ref() == Some(&key.lot) {
            return false;
        }
        self.position.as_ref().is_none_or(|pos| key < pos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoAllocator {
    conservative_ratio: Decimal,
}

impl Default for FifoAllocator {
    fn default() -> Self {
        Self {
            conservative_ratio: DEFAULT_CONSERVATIVE_RATIO,
        }
    }
}

impl FifoAllocator {
    pub fn new(conservative_ratio: Decimal) -> DomainResult<Self> {
        if conservative_ratio.is_sign_negative() || conservative_ratio > Decimal::ONE {
            return Err(DomainError::validation(format!(
                "conservative ratio must be within [0, 1], got {conservative_ratio}"
            )));
        }
        Ok(Self { conservative_ratio })
    }

    pub fn conservative_ratio(&self) -> Decimal {
        self.conservative_ratio
    }

    /// Unit cost used when nothing better is known.
    pub fn conservative_unit_cost(&self, unit_sale_price: Decimal) -> Decimal {
        unit_sale_price * self.conservative_ratio
    }

    pub fn allocate(
        &self,
        history: &ItemHistory,
        request: &AllocationRequest,
    ) -> DomainResult<CostAllocation> {
        ensure_positive_quantity(request.quantity, "sale quantity")?;
        if request.unit_sale_price.is_sign_negative() {
            return Err(DomainError::validation("unit sale price cannot be negative"));
        }
        if history.item_id() != request.item_id {
            return Err(DomainError::invariant(format!(
                "history for item {} used to price item {}",
                history.item_id(),
                request.item_id
            )));
        }

        let quantity = Decimal::from(request.quantity);

        let at = request.position.as_ref().map(|p| p.at);
        if let Some((conversion, produced)) = history.latest_produced_cost(at) {
            tracing::debug!(
                item_id = %request.item_id,
                conversion = %conversion.id(),
                unit_cost = %produced,
                "using produced cost"
            );
            return Ok(CostAllocation {
                item_id: request.item_id,
                quantity: request.quantity,
                unit_cost: produced,
                total_cost: produced * quantity,
                provenance: CostProvenance::ProducedCost,
                draws: Vec::new(),
                shortage: 0,
                source_conversion: Some(conversion.id().clone()),
            });
        }

        let conservative = self.conservative_unit_cost(request.unit_sale_price);

        if history.purchases().is_empty() {
            tracing::warn!(
                item_id = %request.item_id,
                quantity = request.quantity,
                unit_cost = %conservative,
                "no purchase history; pricing conservatively"
            );
            return Ok(CostAllocation {
                item_id: request.item_id,
                quantity: request.quantity,
                unit_cost: conservative,
                total_cost: conservative * quantity,
                provenance: CostProvenance::NoPurchaseHistory,
                draws: Vec::new(),
                shortage: request.quantity,
                source_conversion: None,
            });
        }

        // Units already taken from the front of the queue by earlier sales.
        let mut consumed: i64 = history
            .sales()
            .iter()
            .filter(|s| request.counts_as_prior(&s.order_key()))
            .try_fold(0i64, |acc, s| acc.checked_add(s.quantity()))
            .ok_or_else(|| DomainError::invariant("prior sales quantity overflow"))?;

        let mut needed = request.quantity;
        let mut total = Decimal::ZERO;
        let mut draws = Vec::new();

        for lot in history.purchases() {
            if needed == 0 {
                break;
            }
            let mut available = lot.quantity();
            if consumed > 0 {
                let spent = consumed.min(available);
                consumed -= spent;
                available -= spent;
            }
            if available == 0 {
                continue;
            }

            let take = needed.min(available);
            let draw = LotDraw {
                lot: lot.lot().clone(),
                purchased_at: lot.purchased_at(),
                quantity: take,
                unit_price: lot.unit_price(),
            };
            tracing::debug!(
                item_id = %request.item_id,
                lot = %draw.lot,
                quantity = take,
                unit_price = %draw.unit_price,
                "drawing from purchase lot"
            );
            total += draw.cost();
            draws.push(draw);
            needed -= take;
        }

        let provenance = if needed > 0 {
            tracing::warn!(
                item_id = %request.item_id,
                shortage = needed,
                unit_cost = %conservative,
                "purchase lots exhausted; pricing shortage conservatively"
            );
            total += conservative * Decimal::from(needed);
            CostProvenance::FifoWithShortage
        } else {
            CostProvenance::Fifo
        };

        Ok(CostAllocation {
            item_id: request.item_id,
            quantity: request.quantity,
            unit_cost: total / quantity,
            total_cost: total,
            provenance,
            draws,
            shortage: needed,
            source_conversion: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ConversionEvent, NewConversion, PurchaseLot, SaleUnit};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap()
    }

    fn lot(s: &str) -> LotId {
        LotId::new(s).unwrap()
    }

    fn purchase(item: ItemId, id: &str, qty: i64, price: Decimal, day: u32) -> PurchaseLot {
        PurchaseLot::new(item, qty, price, lot(id), t(day)).unwrap()
    }

    fn sale(item: ItemId, id: &str, qty: i64, day: u32) -> SaleUnit {
        SaleUnit::new(item, qty, dec!(50), lot(id), t(day)).unwrap()
    }

    fn two_lots(item: ItemId) -> Vec<PurchaseLot> {
        vec![
            purchase(item, "PB-1", 100, dec!(20), 1),
            purchase(item, "PB-2", 50, dec!(25), 2),
        ]
    }

    #[test]
    fn sale_spanning_two_lots() {
        let item = ItemId::new();
        let history = ItemHistory::new(item, two_lots(item), vec![], vec![]);

        let alloc = FifoAllocator::default()
            .allocate(&history, &AllocationRequest::new(item, 120, dec!(40)))
            .unwrap();

        assert_eq!(alloc.total_cost, dec!(2500));
        assert_eq!(alloc.rounded_unit_cost(2), dec!(20.83));
        assert_eq!(alloc.provenance, CostProvenance::Fifo);
        assert_eq!(alloc.draws.len(), 2);
        assert_eq!(alloc.draws[1].quantity, 20);
    }

    #[test]
    fn no_purchase_history_is_priced_at_sixty_percent() {
        let item = ItemId::new();
        let history = ItemHistory::empty(item);

        let alloc = FifoAllocator::default()
            .allocate(&history, &AllocationRequest::new(item, 10, dec!(100)))
            .unwrap();

        assert_eq!(alloc.unit_cost, dec!(60.0));
        assert_eq!(alloc.provenance, CostProvenance::NoPurchaseHistory);
        assert!(alloc.provenance.is_conservative());
    }

    #[test]
    fn prior_sales_consume_the_front_of_the_queue() {
        let item = ItemId::new();
        let history = ItemHistory::new(item, two_lots(item), vec![sale(item, "SB-1", 90, 3)], vec![]);

        let alloc = FifoAllocator::default()
            .allocate(&history, &AllocationRequest::new(item, 20, dec!(40)))
            .unwrap();

        // 10 left at 20, then 10 at 25.
        assert_eq!(alloc.total_cost, dec!(450));
        assert_eq!(alloc.draws[0].lot.as_str(), "PB-1");
        assert_eq!(alloc.draws[0].quantity, 10);
    }

    #[test]
    fn shortage_is_priced_conservatively() {
        let item = ItemId::new();
        let history = ItemHistory::new(item, two_lots(item), vec![sale(item, "SB-1", 140, 3)], vec![]);

        let alloc = FifoAllocator::default()
            .allocate(&history, &AllocationRequest::new(item, 30, dec!(100)))
            .unwrap();

        // 10 units at 25 then 20 units at 60.
        assert_eq!(alloc.total_cost, dec!(1450.0));
        assert_eq!(alloc.shortage, 20);
        assert_eq!(alloc.provenance, CostProvenance::FifoWithShortage);
    }

    #[test]
    fn excluded_lot_does_not_consume_its_own_stock() {
        let item = ItemId::new();
        let history = ItemHistory::new(item, two_lots(item), vec![sale(item, "SB-1", 120, 3)], vec![]);
        let allocator = FifoAllocator::default();

        let own = allocator
            .allocate(&history, &AllocationRequest::new(item, 120, dec!(40)).excluding(lot("SB-1")))
            .unwrap();
        let counted = allocator
            .allocate(&history, &AllocationRequest::new(item, 120, dec!(40)))
            .unwrap();

        assert_eq!(own.total_cost, dec!(2500));
        assert_ne!(counted.total_cost, own.total_cost);
    }

    #[test]
    fn position_ignores_later_sales() {
        let item = ItemId::new();
        let sales = vec![sale(item, "SB-1", 100, 3), sale(item, "SB-2", 30, 5)];
        let history = ItemHistory::new(item, two_lots(item), sales, vec![]);

        let first = FifoAllocator::default()
            .allocate(
                &history,
                &AllocationRequest::new(item, 100, dec!(40)).at(OrderKey::new(t(3), lot("SB-1"))),
            )
            .unwrap();

        assert_eq!(first.unit_cost, dec!(20));
    }

    #[test]
    fn same_timestamp_sales_order_by_lot() {
        let item = ItemId::new();
        let sales = vec![sale(item, "SB-B", 100, 3), sale(item, "SB-A", 100, 3)];
        let history = ItemHistory::new(item, two_lots(item), sales, vec![]);
        let allocator = FifoAllocator::default();

        let a = allocator
            .allocate(&history, &AllocationRequest::new(item, 100, dec!(40)).at(OrderKey::new(t(3), lot("SB-A"))))
            .unwrap();
        let b = allocator
            .allocate(&history, &AllocationRequest::new(item, 100, dec!(40)).at(OrderKey::new(t(3), lot("SB-B"))))
            .unwrap();

        assert_eq!(a.unit_cost, dec!(20));
        assert_eq!(b.draws[0].lot.as_str(), "PB-2");
        assert_eq!(b.shortage, 50);
    }

    #[test]
    fn produced_cost_wins_over_fifo() {
        let bottle = ItemId::new();
        let blow = ConversionEvent::new(NewConversion {
            id: lot("BLOW-1"),
            from_item: ItemId::new(),
            to_item: bottle,
            input_quantity: 100,
            output_quantity: 95,
            waste_quantity: 5,
            cost_per_unit: dec!(2),
            produced_unit_cost: Some(dec!(22)),
            converted_at: t(2),
        })
        .unwrap();
        let history = ItemHistory::new(
            bottle,
            vec![purchase(bottle, "PB-9", 10, dec!(99), 1)],
            vec![],
            vec![blow],
        );

        let alloc = FifoAllocator::default()
            .allocate(&history, &AllocationRequest::new(bottle, 40, dec!(35)))
            .unwrap();

        assert_eq!(alloc.unit_cost, dec!(22));
        assert_eq!(alloc.provenance, CostProvenance::ProducedCost);
        assert_eq!(alloc.source_conversion.unwrap().as_str(), "BLOW-1");
    }

    #[test]
    fn rejects_invalid_requests() {
        let item = ItemId::new();
        let history = ItemHistory::empty(item);
        let allocator = FifoAllocator::default();

        assert!(matches!(
            allocator.allocate(&history, &AllocationRequest::new(item, 0, dec!(1))),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert!(matches!(
            allocator.allocate(&history, &AllocationRequest::new(ItemId::new(), 1, dec!(1))),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(FifoAllocator::new(dec!(1.5)).is_err());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_cost(dec!(2.345), 2), dec!(2.35));
        assert_eq!(round_cost(dec!(2.344), 2), dec!(2.34));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: allocation is deterministic and never draws more than was bought.
        #[test]
        fn allocation_is_deterministic(
            lots in prop::collection::vec((1i64..200, 1u32..500, 1u32..28), 0..8),
            prior in prop::collection::vec((1i64..150, 1u32..28), 0..8),
            qty in 1i64..300,
            price in 1u32..1000,
        ) {
            let item = ItemId::new();
            let purchases: Vec<_> = lots
                .iter()
                .enumerate()
                .map(|(i, (q, p, d))| purchase(item, &format!("PB-{i}"), *q, Decimal::from(*p), *d))
                .collect();
            let sales: Vec<_> = prior
                .iter()
                .enumerate()
                .map(|(i, (q, d))| sale(item, &format!("SB-{i}"), *q, *d))
                .collect();
            let history = ItemHistory::new(item, purchases, sales, vec![]);
            let request = AllocationRequest::new(item, qty, Decimal::from(price));
            let allocator = FifoAllocator::default();

            let first = allocator.allocate(&history, &request).unwrap();
            let second = allocator.allocate(&history, &request).unwrap();

            prop_assert_eq!(&first, &second);
            let drawn: i64 = first.draws.iter().map(|d| d.quantity).sum();
            prop_assert_eq!(drawn + first.shortage, qty);
            let bought: i64 = lots.iter().map(|(q, _, _)| *q).sum();
            prop_assert!(drawn <= bought);
        }
    }
}
