//! Infrastructure layer: transaction storage, item catalog, quote cache,
//! configuration and the engine facade that wires them to the ledger.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod store;


pub use cache::{NoQuoteCache, QuoteCache, QuoteKey, TtlQuoteCache};
pub use catalog::{InMemoryItemCatalog, ItemCatalog};
pub use config::EngineConfig;
pub use engine::{
    Bill, BillLine, ConversionOrder, InventoryEngine, ItemUpdate, RecalculationSummary,
};
pub use store::{InMemoryTransactionStore, Restamp, TransactionStore};
