//! Inventory engine: the order-entry and reporting boundary.
//!
//! Every write follows the same pipeline:
//!
//! ```text
//! input
//!   ↓
//! 1. Validate (items exist, quantities positive, bill well formed)
//!   ↓
//! 2. Store the record (sales are priced inside the store's write lock)
//!   ↓
//! 3. Append ledger movements (per-item locks, fixed order)
//!      └─ on failure: undo step 2
//!   ↓
//! 4. Invalidate cached quotes, publish StockEvents
//! ```
//!
//! Deletes run the same way in reverse: remove the record, append reversal
//! entries, put the record back if the ledger refuses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockledger_core::{ActorId, Clock, DomainError, DomainResult, ItemId, LotId};
use stockledger_costing::{
    AllocationRequest, ConversionCostPropagator, ConversionEvent, ConversionPlan, CostAllocation,
    FifoAllocator, ItemHistory, NewConversion, PurchaseLot, SaleUnit, WasteEvent,
};
use stockledger_events::EventBus;
use stockledger_inventory::{
    ContinuityReport, ContinuityScope, CostBasisRestamped, CumulativePosition, Item, ItemCategory,
    MonthAudit, MonthlyStatement, MovementEntry, MovementKind, MovementLedger, MovementQuery,
    MovementRequest, StockEvent, YearMonth, check_continuity, monthly_audit, monthly_statement,
    opening_balance,
};

use crate::cache::{QuoteCache, QuoteKey, TtlQuoteCache};
use crate::catalog::{InMemoryItemCatalog, ItemCatalog};
use crate::config::EngineConfig;
use crate::store::{Pricing, TransactionStore};

/// One line of a purchase or sale bill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillLine {
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl BillLine {
    pub fn new(item_id: ItemId, quantity: i64, unit_price: Decimal) -> Self {
        Self {
            item_id,
            quantity,
            unit_price,
        }
    }
}

/// A purchase or sale document: one lot identifier, one timestamp, many lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bill {
    pub lot: LotId,
    pub at: DateTime<Utc>,
    pub lines: Vec<BillLine>,
}

impl Bill {
    pub fn new(lot: LotId, at: DateTime<Utc>) -> Self {
        Self {
            lot,
            at,
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, item_id: ItemId, quantity: i64, unit_price: Decimal) -> Self {
        self.lines.push(BillLine::new(item_id, quantity, unit_price));
        self
    }
}

/// Request to convert a raw item into a produced item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOrder {
    pub id: LotId,
    pub from_item: ItemId,
    pub to_item: ItemId,
    pub plan: ConversionPlan,
    pub cost_per_unit: Decimal,
    /// Defaults to the engine clock's "now".
    pub at: Option<DateTime<Utc>>,
}

/// Metadata edits; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub category: Option<ItemCategory>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculationSummary {
    pub examined: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Lines priced at least partly with the conservative ratio.
    pub conservative: usize,
}

/// Order-entry and reporting facade over store, ledger, allocator and bus.
pub struct InventoryEngine<S, B> {
    store: S,
    bus: B,
    catalog: Arc<dyn ItemCatalog>,
    cache: Arc<dyn QuoteCache>,
    ledger: MovementLedger,
    clock: Arc<dyn Clock>,
    allocator: FifoAllocator,
    propagator: ConversionCostPropagator,
    cost_scale: u32,
}

impl<S, B> core::fmt::Debug for InventoryEngine<S, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InventoryEngine")
            .field("ledger", &self.ledger)
            .field("allocator", &self.allocator)
            .field("cost_scale", &self.cost_scale)
            .finish_non_exhaustive()
    }
}

impl<S, B> InventoryEngine<S, B> {
    pub fn new(store: S, bus: B, clock: Arc<dyn Clock>, config: &EngineConfig) -> DomainResult<Self> {
        let allocator = FifoAllocator::new(config.costing.conservative_ratio)?;
        let ledger = MovementLedger::new(clock.clone()).with_lock_timeout(config.lock_timeout());
        let cache = Arc::new(TtlQuoteCache::new(config.cache_ttl(), clock.clone()));
        Ok(Self {
            store,
            bus,
            catalog: Arc::new(InMemoryItemCatalog::new()),
            cache,
            ledger,
            clock,
            allocator,
            propagator: ConversionCostPropagator,
            cost_scale: config.costing.cost_scale,
        })
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ItemCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn QuoteCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn ledger(&self) -> &MovementLedger {
        &self.ledger
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn allocator(&self) -> &FifoAllocator {
        &self.allocator
    }
}

impl<S, B> InventoryEngine<S, B>
where
    S: TransactionStore,
    B: EventBus<StockEvent>,
{
    // Items

    pub fn register_item(
        &self,
        name: impl Into<String>,
        category: ItemCategory,
        unit: impl Into<String>,
    ) -> DomainResult<Item> {
        let item = Item::new(ItemId::new(), name, category, unit)?;
        self.catalog.upsert(item.clone());
        tracing::info!(item_id = %item.id_typed(), name = item.name(), %category, "item registered");
        Ok(item)
    }

    pub fn update_item(&self, id: ItemId, update: ItemUpdate) -> DomainResult<Item> {
        let mut item = self.catalog.require(id)?;
        if let Some(name) = update.name {
            item.rename(name)?;
        }
        if let Some(unit) = update.unit {
            item.set_unit(unit)?;
        }
        if let Some(category) = update.category {
            item.set_category(category);
        }
        self.catalog.upsert(item.clone());
        Ok(item)
    }

    /// Remove an item that nothing references.
    pub fn remove_item(&self, id: ItemId) -> DomainResult<Item> {
        self.catalog.require(id)?;
        if self.ledger.has_movements(id) || self.store.references_item(id)? {
            return Err(DomainError::conflict(format!(
                "item {id} is referenced by recorded movements"
            )));
        }
        let removed = self
            .catalog
            .remove(id)
            .ok_or_else(|| DomainError::item_not_found(id))?;
        self.cache.invalidate_item(id);
        Ok(removed)
    }

    pub fn item(&self, id: ItemId) -> DomainResult<Item> {
        self.catalog.require(id)
    }

    pub fn items(&self) -> Vec<Item> {
        self.catalog.list()
    }

    // Purchases

    pub fn create_purchase(
        &self,
        item_id: ItemId,
        quantity: i64,
        unit_price: Decimal,
        lot: LotId,
        at: DateTime<Utc>,
        actor: ActorId,
    ) -> DomainResult<PurchaseLot> {
        let bill = Bill::new(lot, at).line(item_id, quantity, unit_price);
        self.create_purchase_bill(bill, actor)?
            .pop()
            .ok_or_else(|| DomainError::invariant("purchase bill stored no lines"))
    }

    pub fn create_purchase_bill(&self, bill: Bill, actor: ActorId) -> DomainResult<Vec<PurchaseLot>> {
        let lots = bill
            .lines
            .iter()
            .map(|line| {
                self.catalog.require(line.item_id)?;
                PurchaseLot::new(line.item_id, line.quantity, line.unit_price, bill.lot.clone(), bill.at)
            })
            .collect::<DomainResult<Vec<_>>>()?;

        self.store.insert_purchase_bill(lots.clone())?;

        let requests = lots
            .iter()
            .map(|p| {
                MovementRequest::new(p.item_id(), p.quantity(), MovementKind::Purchase, bill.lot.clone(), actor)
            })
            .collect();
        let entries = self.record_or_undo(requests, || {
            self.store.remove_purchase_bill(&bill.lot).map(|_| ())
        })?;

        tracing::info!(lot = %bill.lot, lines = lots.len(), "purchase bill recorded");
        self.after_movements(&entries);
        Ok(lots)
    }

    pub fn delete_purchase(&self, lot: &LotId, actor: ActorId) -> DomainResult<Vec<MovementEntry>> {
        let sequences = self.active_sequences(lot, MovementKind::Purchase);
        let removed = self.store.remove_purchase_bill(lot)?;
        let entries = self.reverse_or_restore(lot, &sequences, actor, "purchase bill deleted", || {
            self.store.insert_purchase_bill(removed)
        })?;
        tracing::info!(lot = %lot, reversed = entries.len(), "purchase bill deleted");
        Ok(entries)
    }

    // Sales

    /// Record a single-line sale and return its stamped cost basis.
    pub fn create_sale(
        &self,
        item_id: ItemId,
        quantity: i64,
        unit_price: Decimal,
        lot: LotId,
        at: DateTime<Utc>,
        actor: ActorId,
    ) -> DomainResult<Decimal> {
        let bill = Bill::new(lot, at).line(item_id, quantity, unit_price);
        self.create_sale_bill(bill, actor)?
            .first()
            .and_then(SaleUnit::cost_basis)
            .ok_or_else(|| DomainError::invariant("sale stored without a cost basis"))
    }

    /// Record a sale bill; every line is priced against one history snapshot.
    pub fn create_sale_bill(&self, bill: Bill, actor: ActorId) -> DomainResult<Vec<SaleUnit>> {
        let lines = bill
            .lines
            .iter()
            .map(|line| {
                self.catalog.require(line.item_id)?;
                SaleUnit::new(line.item_id, line.quantity, line.unit_price, bill.lot.clone(), bill.at)
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let stored = self
            .store
            .commit_sale_bill(lines, |history, line| self.price_sale(history, line))?;

        let requests = stored
            .iter()
            .map(|s| MovementRequest::new(s.item_id(), -s.quantity(), MovementKind::Sale, bill.lot.clone(), actor))
            .collect();
        let entries = self.record_or_undo(requests, || self.store.remove_sale_bill(&bill.lot).map(|_| ()))?;

        for line in &stored {
            if let Some(cost_basis) = line.cost_basis() {
                self.publish(StockEvent::CostBasisRestamped(CostBasisRestamped {
                    item_id: line.item_id(),
                    lot: line.lot().clone(),
                    previous: None,
                    cost_basis,
                    occurred_at: self.clock.now(),
                }));
            }
        }
        tracing::info!(lot = %bill.lot, lines = stored.len(), "sale bill recorded");
        self.after_movements(&entries);
        Ok(stored)
    }

    pub fn delete_sale(&self, lot: &LotId, actor: ActorId) -> DomainResult<Vec<MovementEntry>> {
        let sequences = self.active_sequences(lot, MovementKind::Sale);
        let removed = self.store.remove_sale_bill(lot)?;
        let entries = self.reverse_or_restore(lot, &sequences, actor, "sale bill deleted", || {
            self.store.restore_sale_bill(removed)
        })?;
        tracing::info!(lot = %lot, reversed = entries.len(), "sale bill deleted");
        Ok(entries)
    }

    fn price_sale(&self, history: &ItemHistory, line: &SaleUnit) -> DomainResult<Pricing> {
        let request = AllocationRequest::new(line.item_id(), line.quantity(), line.unit_price())
            .excluding(line.lot().clone())
            .at(line.order_key());
        let allocation = self.allocator.allocate(history, &request)?;
        Ok((allocation.rounded_unit_cost(self.cost_scale), allocation.provenance))
    }

    // Conversions

    /// Record a conversion. The produced unit cost is filled from the raw
    /// item's latest purchase when one exists.
    pub fn create_conversion(&self, order: ConversionOrder, actor: ActorId) -> DomainResult<ConversionEvent> {
        self.catalog.require(order.from_item)?;
        self.catalog.require(order.to_item)?;
        let at = order.at.unwrap_or_else(|| self.clock.now());

        let conversion = ConversionEvent::new(NewConversion {
            id: order.id.clone(),
            from_item: order.from_item,
            to_item: order.to_item,
            input_quantity: order.plan.input(),
            output_quantity: order.plan.output(),
            waste_quantity: order.plan.waste(),
            cost_per_unit: order.cost_per_unit,
            produced_unit_cost: None,
            converted_at: at,
        })?;

        let stored = self.store.commit_conversion(conversion, |raw| {
            self.propagator.produced_unit_cost(raw, at, order.cost_per_unit)
        })?;

        let requests = self.propagator.movements(&stored, actor);
        let entries = self.record_or_undo(requests, || self.store.remove_conversion(&order.id).map(|_| ()))?;

        match stored.produced_unit_cost() {
            Some(cost) => tracing::info!(
                conversion = %stored.id(),
                input = stored.input_quantity(),
                output = stored.output_quantity(),
                produced_unit_cost = %cost,
                "conversion recorded"
            ),
            None => tracing::warn!(
                conversion = %stored.id(),
                from_item = %stored.from_item(),
                "conversion recorded without produced cost; raw item has no purchase yet"
            ),
        }
        self.after_movements(&entries);
        Ok(stored)
    }

    pub fn delete_conversion(&self, id: &LotId, actor: ActorId) -> DomainResult<Vec<MovementEntry>> {
        let sequences = self.active_sequences(id, MovementKind::Production);
        let removed = self.store.remove_conversion(id)?;
        let entries = self.reverse_or_restore(id, &sequences, actor, "conversion deleted", || {
            self.store.commit_conversion(removed, |_| None).map(|_| ())
        })?;
        tracing::info!(conversion = %id, reversed = entries.len(), "conversion deleted");
        Ok(entries)
    }

    /// Fill produced costs on conversions that lack one. Returns the updated records.
    pub fn backfill_produced_costs(&self) -> DomainResult<Vec<ConversionEvent>> {
        let updated = self.store.backfill_conversion_costs(|raw, conversion| {
            self.propagator
                .produced_unit_cost(raw, conversion.converted_at(), conversion.cost_per_unit())
        })?;
        for conversion in &updated {
            self.cache.invalidate_item(conversion.to_item());
        }
        tracing::info!(updated = updated.len(), "produced costs backfilled");
        Ok(updated)
    }

    // Waste and adjustments

    pub fn record_waste(
        &self,
        id: LotId,
        item_id: ItemId,
        quantity: i64,
        price_per_unit: Decimal,
        actor: ActorId,
    ) -> DomainResult<WasteEvent> {
        self.catalog.require(item_id)?;
        let waste = WasteEvent::new(id.clone(), item_id, quantity, price_per_unit, self.clock.now())?;
        self.store.insert_waste(waste.clone())?;

        let request = MovementRequest::new(item_id, -quantity, MovementKind::Waste, id.clone(), actor);
        let entries = self.record_or_undo(vec![request], || self.store.remove_waste(&id).map(|_| ()))?;

        tracing::info!(waste = %id, item_id = %item_id, quantity, value = %waste.value(), "waste recorded");
        self.after_movements(&entries);
        Ok(waste)
    }

    pub fn delete_waste(&self, id: &LotId, actor: ActorId) -> DomainResult<Vec<MovementEntry>> {
        let sequences = self.active_sequences(id, MovementKind::Waste);
        let removed = self.store.remove_waste(id)?;
        self.reverse_or_restore(id, &sequences, actor, "waste record deleted", || {
            self.store.insert_waste(removed)
        })
    }

    /// Manual stock correction.
    pub fn record_adjustment(
        &self,
        item_id: ItemId,
        delta: i64,
        reference: LotId,
        note: impl Into<String>,
        actor: ActorId,
    ) -> DomainResult<MovementEntry> {
        self.catalog.require(item_id)?;
        let request = MovementRequest::new(item_id, delta, MovementKind::Adjustment, reference, actor).with_note(note);
        let entry = self.ledger.record(request)?;
        self.after_movements(std::slice::from_ref(&entry));
        Ok(entry)
    }

    // Costing

    /// Price a hypothetical sale without writing anything.
    pub fn quote_cost(&self, item_id: ItemId, quantity: i64, unit_sale_price: Decimal) -> DomainResult<CostAllocation> {
        self.catalog.require(item_id)?;
        let key = QuoteKey::new(item_id, quantity, unit_sale_price);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let generation = self.cache.generation(item_id);
        let history = self.store.item_history(item_id)?;
        let quote = self
            .allocator
            .allocate(&history, &AllocationRequest::new(item_id, quantity, unit_sale_price))?;
        self.cache.put(key, quote.clone(), generation);
        Ok(quote)
    }

    /// Re-run the allocator for every sale line in `(timestamp, lot)` order.
    ///
    /// Each line is restamped atomically; the run as a whole is not. Balances
    /// are never touched.
    pub fn recalculate_all_cost_basis(&self) -> DomainResult<RecalculationSummary> {
        let mut summary = RecalculationSummary::default();
        for sale in self.store.sales()? {
            let restamp = self
                .store
                .restamp_sale(sale.item_id(), sale.lot(), |history, line| self.price_sale(history, line));
            let restamp = match restamp {
                Ok(r) => r,
                // Deleted while the run was in progress.
                Err(DomainError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            summary.examined += 1;
            if restamp.provenance.is_conservative() {
                summary.conservative += 1;
            }

            if restamp.changed() {
                summary.updated += 1;
                tracing::debug!(
                    lot = %sale.lot(),
                    item_id = %sale.item_id(),
                    previous = ?restamp.previous,
                    cost_basis = %restamp.current,
                    "cost basis restamped"
                );
                self.publish(StockEvent::CostBasisRestamped(CostBasisRestamped {
                    item_id: sale.item_id(),
                    lot: sale.lot().clone(),
                    previous: restamp.previous,
                    cost_basis: restamp.current,
                    occurred_at: self.clock.now(),
                }));
            } else {
                summary.unchanged += 1;
            }
        }
        tracing::info!(
            examined = summary.examined,
            updated = summary.updated,
            conservative = summary.conservative,
            "cost basis recalculation finished"
        );
        Ok(summary)
    }

    // Reporting

    pub fn get_movements(&self, query: &MovementQuery) -> Vec<MovementEntry> {
        self.ledger.movements(query)
    }

    pub fn get_balance(&self, item_id: ItemId) -> DomainResult<i64> {
        self.catalog.require(item_id)?;
        Ok(self.ledger.balance(item_id))
    }

    pub fn run_continuity_check(&self, item_id: Option<ItemId>) -> DomainResult<ContinuityReport> {
        let scope = match item_id {
            Some(id) => ContinuityScope::for_item(id),
            None => ContinuityScope::all(),
        };
        self.run_continuity_check_in(scope)
    }

    /// Continuity check over a scope, with cumulative-position mismatches attached.
    pub fn run_continuity_check_in(&self, scope: ContinuityScope) -> DomainResult<ContinuityReport> {
        if let Some(id) = scope.item_id {
            self.catalog.require(id)?;
        }
        let query = MovementQuery {
            item_id: scope.item_id,
            since: None,
            until: None,
        };
        let entries = self.ledger.movements(&query);
        let items: Vec<ItemId> = match scope.item_id {
            Some(id) => vec![id],
            None => self.ledger.balances().into_iter().map(|b| b.item_id).collect(),
        };

        let report = check_continuity(&entries, scope, self.clock.now())
            .with_cumulative_positions(items.into_iter().map(|id| self.ledger.cumulative_position(id)));

        if report.passed() {
            tracing::info!(items = report.items_checked, "continuity check passed");
        } else {
            tracing::warn!(
                discontinuities = report.discontinuities.len(),
                suspected_resets = report.suspected_resets.len(),
                mismatches = report.cumulative_mismatches.len(),
                "continuity check failed"
            );
        }
        Ok(report)
    }

    pub fn opening_balance(&self, item_id: ItemId, month: YearMonth) -> DomainResult<i64> {
        Ok(opening_balance(&self.item_movements(item_id)?, item_id, month))
    }

    pub fn monthly_statement(&self, item_id: ItemId, month: YearMonth) -> DomainResult<MonthlyStatement> {
        Ok(monthly_statement(&self.item_movements(item_id)?, item_id, month))
    }

    pub fn monthly_audit(&self, item_id: ItemId) -> DomainResult<Vec<MonthAudit>> {
        Ok(monthly_audit(&self.item_movements(item_id)?, item_id))
    }

    pub fn cumulative_position(&self, item_id: ItemId) -> DomainResult<CumulativePosition> {
        self.catalog.require(item_id)?;
        Ok(self.ledger.cumulative_position(item_id))
    }

    fn item_movements(&self, item_id: ItemId) -> DomainResult<Vec<MovementEntry>> {
        self.catalog.require(item_id)?;
        Ok(self.ledger.movements(&MovementQuery::for_item(item_id)))
    }

    // Plumbing

    fn record_or_undo(
        &self,
        requests: Vec<MovementRequest>,
        undo: impl FnOnce() -> DomainResult<()>,
    ) -> DomainResult<Vec<MovementEntry>> {
        match self.ledger.record_batch(requests) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                if let Err(undo_err) = undo() {
                    tracing::error!(error = %undo_err, "failed to undo record after ledger rejection");
                }
                Err(err)
            }
        }
    }

    /// Unreversed entries written for a record. Read while the record is still
    /// stored, so a bill re-created under the same id after the removal is
    /// never swept into the reversal.
    fn active_sequences(&self, reference: &LotId, kind: MovementKind) -> Vec<u64> {
        self.ledger
            .active_entries(reference, kind)
            .iter()
            .map(MovementEntry::sequence)
            .collect()
    }

    fn reverse_or_restore(
        &self,
        reference: &LotId,
        sequences: &[u64],
        actor: ActorId,
        reason: &str,
        restore: impl FnOnce() -> DomainResult<()>,
    ) -> DomainResult<Vec<MovementEntry>> {
        match self.ledger.reverse(sequences, actor, reason) {
            Ok(entries) => {
                self.after_movements(&entries);
                Ok(entries)
            }
            Err(err) => {
                if let Err(restore_err) = restore() {
                    tracing::error!(error = %restore_err, reference = %reference, "failed to restore record after ledger rejection");
                }
                Err(err)
            }
        }
    }

    fn after_movements(&self, entries: &[MovementEntry]) {
        for entry in entries {
            self.cache.invalidate_item(entry.item_id());
            self.publish(StockEvent::movement(entry.clone()));
        }
    }

    fn publish(&self, event: StockEvent) {
        if let Err(err) = self.bus.publish(event) {
            tracing::warn!(error = ?err, "failed to publish stock event");
        }
    }
}
