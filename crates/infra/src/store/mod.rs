//! Transaction storage.
//!
//! The trait is the seam for a persistent backend; the in-memory
//! implementation backs tests and embedded use.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryTransactionStore;
pub use r#trait::{Pricing, Restamp, TransactionStore};
