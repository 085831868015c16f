use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemId, LotId};
use stockledger_events::Event;

use crate::movement::MovementEntry;

/// Event: a ledger entry was appended (including reversals).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub entry: MovementEntry,
}

/// Event: a sale line's stored cost basis changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBasisRestamped {
    pub item_id: ItemId,
    pub lot: LotId,
    pub previous: Option<Decimal>,
    pub cost_basis: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Change notifications published after successful writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockEvent {
    MovementRecorded(MovementRecorded),
    CostBasisRestamped(CostBasisRestamped),
}

impl StockEvent {
    pub fn movement(entry: MovementEntry) -> Self {
        StockEvent::MovementRecorded(MovementRecorded { entry })
    }

    /// The item whose cached cost figures this event invalidates.
    pub fn item_id(&self) -> ItemId {
        match self {
            StockEvent::MovementRecorded(e) => e.entry.item_id(),
            StockEvent::CostBasisRestamped(e) => e.item_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::MovementRecorded(_) => "stock.movement.recorded",
            StockEvent::CostBasisRestamped(_) => "stock.sale.cost_basis_restamped",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::MovementRecorded(e) => e.entry.occurred_at(),
            StockEvent::CostBasisRestamped(e) => e.occurred_at,
        }
    }
}
