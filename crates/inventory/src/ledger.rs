//! Append-only movement ledger.
//!
//! The ledger owns the per-item running balance. Every change goes through
//! [`MovementLedger::record`] (or its batch form), which serializes writers per
//! item, computes `before`/`after`, appends an immutable [`MovementEntry`] and
//! moves the balance. Past entries are never edited; deletions upstream are
//! expressed as reversal entries.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use stockledger_core::{ActorId, Clock, DomainError, DomainResult, ItemId, LotId};

use crate::movement::{
    MovementEntry, MovementKind, MovementParts, MovementQuery, MovementRequest,
    sort_chronologically,
};
use crate::statement::{CumulativePosition, cumulative_position};

/// Default wait for a per-item lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Current stock of one item. Only the ledger writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub item_id: ItemId,
    /// May be negative: selling or consuming ahead of recorded stock is allowed.
    pub quantity: i64,
    pub last_sequence: Option<u64>,
    pub last_movement_at: Option<DateTime<Utc>>,
}

impl StockBalance {
    fn empty(item_id: ItemId) -> Self {
        Self {
            item_id,
            quantity: 0,
            last_sequence: None,
            last_movement_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct Journal {
    entries: Vec<MovementEntry>,
    reversed: HashSet<u64>,
}

/// A computed-but-not-yet-appended entry.
struct Pending {
    request: MovementRequest,
    before: i64,
    after: i64,
    reverses: Option<u64>,
}

/// Append-only, per-item serialized stock ledger.
pub struct MovementLedger {
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    slots: RwLock<HashMap<ItemId, Arc<Mutex<StockBalance>>>>,
    journal: RwLock<Journal>,
}

impl core::fmt::Debug for MovementLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MovementLedger")
            .field("lock_timeout", &self.lock_timeout)
            .field("entries", &self.journal.read().entries.len())
            .finish()
    }
}

impl MovementLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            slots: RwLock::new(HashMap::new()),
            journal: RwLock::new(Journal::default()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Append one movement and return the written entry.
    pub fn record(&self, request: MovementRequest) -> DomainResult<MovementEntry> {
        let mut written = self.record_batch(vec![request])?;
        written
            .pop()
            .ok_or_else(|| DomainError::invariant("ledger append produced no entry"))
    }

    /// Append several movements atomically.
    ///
    /// Item locks are taken in `ItemId` order, so two batches touching the same
    /// pair of items cannot deadlock. Either every entry is written or none is.
    pub fn record_batch(&self, requests: Vec<MovementRequest>) -> DomainResult<Vec<MovementEntry>> {
        let pending = requests.into_iter().map(|r| (r, None)).collect();
        self.append(pending)
    }

    /// Reverse previously written entries by appending opposite deltas.
    ///
    /// Each reversal keeps the original kind and reference and points back to
    /// the original through [`MovementEntry::reverses`]. Reversing an entry twice,
    /// or reversing a reversal, is a conflict.
    pub fn reverse(
        &self,
        sequences: &[u64],
        actor: ActorId,
        reason: &str,
    ) -> DomainResult<Vec<MovementEntry>> {
        let mut pending = Vec::with_capacity(sequences.len());
        {
            let journal = self.journal.read();
            let mut seen = HashSet::new();
            for &seq in sequences {
                let original = Self::lookup(&journal, seq)
                    .ok_or_else(|| DomainError::not_found(format!("movement #{seq}")))?;
                if original.is_reversal() {
                    return Err(DomainError::conflict(format!(
                        "movement #{seq} is itself a reversal"
                    )));
                }
                if journal.reversed.contains(&seq) || !seen.insert(seq) {
                    return Err(DomainError::conflict(format!(
                        "movement #{seq} is already reversed"
                    )));
                }
                let request = MovementRequest::new(
                    original.item_id(),
                    -original.delta(),
                    original.kind(),
                    original.reference().clone(),
                    actor,
                )
                .with_note(format!("reversal of #{seq}: {reason}"));
                pending.push((request, Some(seq)));
            }
        }
        self.append(pending)
    }

    fn lookup(journal: &Journal, sequence: u64) -> Option<&MovementEntry> {
        let idx = usize::try_from(sequence.checked_sub(1)?).ok()?;
        journal.entries.get(idx)
    }

    fn slot(&self, item_id: ItemId) -> Arc<Mutex<StockBalance>> {
        if let Some(slot) = self.slots.read().get(&item_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(item_id)
            .or_insert_with(|| Arc::new(Mutex::new(StockBalance::empty(item_id))))
            .clone()
    }

    fn append(&self, requests: Vec<(MovementRequest, Option<u64>)>) -> DomainResult<Vec<MovementEntry>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        for (request, _) in &requests {
            if request.delta == 0 {
                return Err(DomainError::validation(format!(
                    "movement delta cannot be zero (item {}, reference {})",
                    request.item_id, request.reference
                )));
            }
        }

        let items: BTreeSet<ItemId> = requests.iter().map(|(r, _)| r.item_id).collect();
        let slots: Vec<(ItemId, Arc<Mutex<StockBalance>>)> =
            items.iter().map(|id| (*id, self.slot(*id))).collect();

        let mut guards: Vec<(ItemId, MutexGuard<'_, StockBalance>)> = Vec::with_capacity(slots.len());
        for (id, slot) in &slots {
            let guard = slot.try_lock_for(self.lock_timeout).ok_or_else(|| {
                tracing::warn!(item_id = %id, timeout_ms = self.lock_timeout.as_millis() as u64, "item lock timeout");
                DomainError::concurrent_modification(format!(
                    "timed out waiting for stock lock on item {id}"
                ))
            })?;
            guards.push((*id, guard));
        }

        // Compute every before/after pair first so a failure leaves nothing written.
        let mut working: HashMap<ItemId, i64> =
            guards.iter().map(|(id, g)| (*id, g.quantity)).collect();
        let mut pending = Vec::with_capacity(requests.len());
        for (request, reverses) in requests {
            let balance = working.entry(request.item_id).or_insert(0);
            let before = *balance;
            let after = before.checked_add(request.delta).ok_or_else(|| {
                DomainError::invariant(format!("stock balance overflow on item {}", request.item_id))
            })?;
            *balance = after;
            pending.push(Pending {
                request,
                before,
                after,
                reverses,
            });
        }

        let now = self.clock.now();
        let mut written = Vec::with_capacity(pending.len());
        {
            let mut journal = self.journal.write();
            for p in &pending {
                if let Some(seq) = p.reverses {
                    if journal.reversed.contains(&seq) {
                        return Err(DomainError::conflict(format!(
                            "movement #{seq} is already reversed"
                        )));
                    }
                }
            }

            for p in pending {
                let guard = guards
                    .iter_mut()
                    .find(|(id, _)| *id == p.request.item_id)
                    .map(|(_, g)| g)
                    .ok_or_else(|| DomainError::invariant("item lock missing for pending movement"))?;

                // Keep per-item timestamps non-decreasing so chronological and
                // append order agree.
                let occurred_at = match guard.last_movement_at {
                    Some(last) if last > now => last,
                    _ => now,
                };
                let sequence = journal.entries.len() as u64 + 1;

                let entry = MovementEntry::from_parts(MovementParts {
                    sequence,
                    item_id: p.request.item_id,
                    delta: p.request.delta,
                    kind: p.request.kind,
                    reference: p.request.reference,
                    before: p.before,
                    after: p.after,
                    occurred_at,
                    actor: p.request.actor,
                    note: p.request.note,
                    reverses: p.reverses,
                })?;

                if let Some(seq) = entry.reverses() {
                    journal.reversed.insert(seq);
                }
                guard.quantity = entry.after();
                guard.last_sequence = Some(sequence);
                guard.last_movement_at = Some(occurred_at);

                if entry.after() < 0 {
                    tracing::warn!(
                        item_id = %entry.item_id(),
                        sequence,
                        balance = entry.after(),
                        kind = %entry.kind(),
                        "stock balance is negative"
                    );
                }
                tracing::debug!(
                    item_id = %entry.item_id(),
                    sequence,
                    delta = entry.delta(),
                    before = entry.before(),
                    after = entry.after(),
                    kind = %entry.kind(),
                    reference = %entry.reference(),
                    "movement recorded"
                );

                journal.entries.push(entry.clone());
                written.push(entry);
            }
        }

        Ok(written)
    }

    /// Current balance of an item (0 if it never moved).
    pub fn balance(&self, item_id: ItemId) -> i64 {
        self.stock_balance(item_id).map(|b| b.quantity).unwrap_or(0)
    }

    pub fn stock_balance(&self, item_id: ItemId) -> Option<StockBalance> {
        let slot = self.slots.read().get(&item_id).cloned()?;
        let balance = slot.lock().clone();
        Some(balance)
    }

    /// Every item that has ever moved.
    pub fn balances(&self) -> Vec<StockBalance> {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut out: Vec<StockBalance> = slots.iter().map(|s| s.lock().clone()).collect();
        out.sort_by_key(|b| b.item_id);
        out
    }

    /// Entries matching `query`, oldest first.
    pub fn movements(&self, query: &MovementQuery) -> Vec<MovementEntry> {
        let mut out: Vec<MovementEntry> = self
            .journal
            .read()
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        sort_chronologically(&mut out);
        out
    }

    pub fn entry(&self, sequence: u64) -> Option<MovementEntry> {
        Self::lookup(&self.journal.read(), sequence).cloned()
    }

    /// Original, not yet reversed entries written under `reference` with `kind`.
    pub fn active_entries(&self, reference: &LotId, kind: MovementKind) -> Vec<MovementEntry> {
        let journal = self.journal.read();
        journal
            .entries
            .iter()
            .filter(|e| {
                e.kind() == kind
                    && e.reference() == reference
                    && !e.is_reversal()
                    && !journal.reversed.contains(&e.sequence())
            })
            .cloned()
            .collect()
    }

    pub fn is_reversed(&self, sequence: u64) -> bool {
        self.journal.read().reversed.contains(&sequence)
    }

    /// Whether any entry references the item.
    pub fn has_movements(&self, item_id: ItemId) -> bool {
        self.stock_balance(item_id)
            .is_some_and(|b| b.last_sequence.is_some())
    }

    pub fn len(&self) -> usize {
        self.journal.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All-time totals for an item compared against its balance.
    pub fn cumulative_position(&self, item_id: ItemId) -> CumulativePosition {
        let entries = self.movements(&MovementQuery::for_item(item_id));
        cumulative_position(item_id, &entries, self.balance(item_id))
    }
}
