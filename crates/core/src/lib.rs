//! `stockledger-core`: shared building blocks for the stock ledger.
//!
//! Identifiers, the domain error taxonomy and the clock abstraction. No IO.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ensure_positive_quantity};
pub use id::{ActorId, ItemId, LotId};
