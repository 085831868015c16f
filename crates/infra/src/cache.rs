//! Cost-quote cache.
//!
//! Quotes are keyed by `(item, quantity, price)` and expire after a TTL.
//! Any write touching an item drops all of that item's quotes, either directly
//! from the engine or by feeding [`StockEvent`]s to [`TtlQuoteCache::apply`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use stockledger_core::{Clock, ItemId};
use stockledger_costing::CostAllocation;
use stockledger_events::Subscription;
use stockledger_inventory::StockEvent;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub item_id: ItemId,
    pub quantity: i64,
    /// Normalized so `10` and `10.00` share an entry.
    pub unit_sale_price: Decimal,
}

impl QuoteKey {
    pub fn new(item_id: ItemId, quantity: i64, unit_sale_price: Decimal) -> Self {
        Self {
            item_id,
            quantity,
            unit_sale_price: unit_sale_price.normalize(),
        }
    }
}

/// Injected store for cost quotes.
///
/// Callers read [`generation`](QuoteCache::generation) before computing a
/// quote and pass it to [`put`](QuoteCache::put); a quote computed before an
/// invalidation of its item is dropped instead of stored.
pub trait QuoteCache: Send + Sync {
    fn get(&self, key: &QuoteKey) -> Option<CostAllocation>;
    fn generation(&self, item_id: ItemId) -> u64;
    fn put(&self, key: QuoteKey, quote: CostAllocation, generation: u64);
    fn invalidate_item(&self, item_id: ItemId);
    fn clear(&self);
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoQuoteCache;

impl QuoteCache for NoQuoteCache {
    fn get(&self, _key: &QuoteKey) -> Option<CostAllocation> {
        None
    }

    fn generation(&self, _item_id: ItemId) -> u64 {
        0
    }

    fn put(&self, _key: QuoteKey, _quote: CostAllocation, _generation: u64) {}

    fn invalidate_item(&self, _item_id: ItemId) {}

    fn clear(&self) {}
}

#[derive(Debug, Clone)]
struct Cached {
    stored_at: DateTime<Utc>,
    quote: CostAllocation,
}

#[derive(Debug, Default)]
struct Entries {
    quotes: HashMap<QuoteKey, Cached>,
    /// Bumped by every invalidation of the item.
    generations: HashMap<ItemId, u64>,
    /// Bumped by `clear`.
    epoch: u64,
}

impl Entries {
    // Both counters only grow, so their sum changes whenever either does.
    fn generation(&self, item_id: ItemId) -> u64 {
        self.epoch + self.generations.get(&item_id).copied().unwrap_or(0)
    }
}

/// In-memory TTL cache.
///
/// Expired quotes are dropped on read and swept on every insert.
pub struct TtlQuoteCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<Entries>,
}

impl core::fmt::Debug for TtlQuoteCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TtlQuoteCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.read().quotes.len())
            .finish()
    }
}

impl TtlQuoteCache {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            clock,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate on a change notification.
    pub fn apply(&self, event: &StockEvent) {
        self.invalidate_item(event.item_id());
    }

    /// Apply every notification already queued on `subscription`.
    pub fn drain(&self, subscription: &Subscription<StockEvent>) -> usize {
        let events = subscription.drain();
        for event in &events {
            self.apply(event);
        }
        events.len()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.purge_locked(&mut self.entries.write(), now)
    }

    fn purge_locked(&self, entries: &mut Entries, now: DateTime<Utc>) -> usize {
        let before = entries.quotes.len();
        entries.quotes.retain(|_, c| now - c.stored_at < self.ttl);
        before - entries.quotes.len()
    }
}

impl QuoteCache for TtlQuoteCache {
    fn get(&self, key: &QuoteKey) -> Option<CostAllocation> {
        let cached = self.entries.read().quotes.get(key).cloned()?;
        if self.clock.now() - cached.stored_at >= self.ttl {
            self.entries.write().quotes.remove(key);
            return None;
        }
        Some(cached.quote)
    }

    fn generation(&self, item_id: ItemId) -> u64 {
        self.entries.read().generation(item_id)
    }

    fn put(&self, key: QuoteKey, quote: CostAllocation, generation: u64) {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        if entries.generation(key.item_id) != generation {
            tracing::debug!(item_id = %key.item_id, "stale cost quote discarded");
            return;
        }
        self.purge_locked(&mut entries, now);
        entries.quotes.insert(key, Cached { stored_at: now, quote });
    }

    fn invalidate_item(&self, item_id: ItemId) {
        let mut entries = self.entries.write();
        *entries.generations.entry(item_id).or_insert(0) += 1;
        let before = entries.quotes.len();
        entries.quotes.retain(|k, _| k.item_id != item_id);
        let dropped = before - entries.quotes.len();
        if dropped > 0 {
            tracing::debug!(item_id = %item_id, dropped, "cost quotes invalidated");
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.write();
        entries.epoch += 1;
        entries.quotes.clear();
    }
}
