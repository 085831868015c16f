//! Stock side of the engine.
//!
//! Items, the append-only movement ledger that owns every balance, and the
//! read-only views over it (monthly statements and the continuity verifier).
//! No storage or transport lives here.

pub mod continuity;
pub mod event;
pub mod item;
pub mod ledger;
pub mod movement;
pub mod period;
pub mod statement;

pub use continuity::{
    CheckStatus, ContinuityReport, ContinuityScope, Discontinuity, DiscontinuityKind,
    SuspectedReset, check_continuity,
};
pub use event::{CostBasisRestamped, MovementRecorded, StockEvent};
pub use item::{Item, ItemCategory};
pub use ledger::{DEFAULT_LOCK_TIMEOUT, MovementLedger, StockBalance};
pub use movement::{
    MovementEntry, MovementKind, MovementParts, MovementQuery, MovementRequest,
    sort_chronologically,
};
pub use period::{YearMonth, is_first_day_of_month};
pub use statement::{
    CumulativePosition, MonthAudit, MonthlyStatement, cumulative_position, monthly_audit,
    monthly_statement, opening_balance,
};
