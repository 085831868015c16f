use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ActorId, DomainError, DomainResult, ItemId, LotId};

/// What caused a quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Purchase,
    Sale,
    Production,
    Waste,
    Adjustment,
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            MovementKind::Purchase => "purchase",
            MovementKind::Sale => "sale",
            MovementKind::Production => "production",
            MovementKind::Waste => "waste",
            MovementKind::Adjustment => "adjustment",
        })
    }
}

/// A quantity change to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub item_id: ItemId,
    pub delta: i64,
    pub kind: MovementKind,
    pub reference: LotId,
    pub actor: ActorId,
    pub note: Option<String>,
}

impl MovementRequest {
    pub fn new(item_id: ItemId, delta: i64, kind: MovementKind, reference: LotId, actor: ActorId) -> Self {
        Self {
            item_id,
            delta,
            kind,
            reference,
            actor,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// One immutable ledger row.
///
/// Invariant: `after == before + delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    sequence: u64,
    item_id: ItemId,
    delta: i64,
    kind: MovementKind,
    reference: LotId,
    before: i64,
    after: i64,
    occurred_at: DateTime<Utc>,
    actor: ActorId,
    note: Option<String>,
    reverses: Option<u64>,
}

/// Raw fields of a [`MovementEntry`], checked on construction.
#[derive(Debug, Clone)]
pub struct MovementParts {
    pub sequence: u64,
    pub item_id: ItemId,
    pub delta: i64,
    pub kind: MovementKind,
    pub reference: LotId,
    pub before: i64,
    pub after: i64,
    pub occurred_at: DateTime<Utc>,
    pub actor: ActorId,
    pub note: Option<String>,
    pub reverses: Option<u64>,
}

impl MovementEntry {
    /// Build an entry from stored fields (imports, replays, fixtures).
    pub fn from_parts(parts: MovementParts) -> DomainResult<Self> {
        let expected = parts
            .before
            .checked_add(parts.delta)
            .ok_or_else(|| DomainError::invariant("movement balance overflow"))?;
        if expected != parts.after {
            return Err(DomainError::invariant(format!(
                "movement #{}: after ({}) != before ({}) + delta ({})",
                parts.sequence, parts.after, parts.before, parts.delta
            )));
        }
        Ok(Self {
            sequence: parts.sequence,
            item_id: parts.item_id,
            delta: parts.delta,
            kind: parts.kind,
            reference: parts.reference,
            before: parts.before,
            after: parts.after,
            occurred_at: parts.occurred_at,
            actor: parts.actor,
            note: parts.note,
            reverses: parts.reverses,
        })
    }

    /// Ledger-wide append position (1-based).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    /// Originating bill / lot / conversion identifier.
    pub fn reference(&self) -> &LotId {
        &self.reference
    }

    pub fn before(&self) -> i64 {
        self.before
    }

    pub fn after(&self) -> i64 {
        self.after
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Sequence of the entry this one reverses, if it is a reversal.
    pub fn reverses(&self) -> Option<u64> {
        self.reverses
    }

    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

/// Filter for ledger reads. All bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementQuery {
    pub item_id: Option<ItemId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MovementQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_item(item_id: ItemId) -> Self {
        Self {
            item_id: Some(item_id),
            ..Self::default()
        }
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn matches(&self, entry: &MovementEntry) -> bool {
        self.item_id.is_none_or(|id| id == entry.item_id)
            && self.since.is_none_or(|s| entry.occurred_at >= s)
            && self.until.is_none_or(|u| entry.occurred_at <= u)
    }
}

/// Chronological order used by every ledger read: timestamp, then append order.
pub fn sort_chronologically(entries: &mut [MovementEntry]) {
    entries.sort_by_key(|e| (e.occurred_at, e.sequence));
}
