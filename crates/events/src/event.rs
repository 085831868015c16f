use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are immutable facts about something already written to the ledger.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "inventory.movement.recorded").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the underlying write happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
