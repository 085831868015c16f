//! Cost side of the engine.
//!
//! Transaction records (purchase lots, sale lines, conversions, waste), the
//! per-item history snapshot they are read through, the FIFO cost allocator and
//! the conversion cost propagator. Everything here is deterministic and does no IO.

pub mod allocator;
pub mod conversion;
pub mod history;
pub mod records;

pub use allocator::{
    AllocationRequest, CostAllocation, CostProvenance, DEFAULT_CONSERVATIVE_RATIO,
    DEFAULT_COST_SCALE, FifoAllocator, LotDraw, round_cost,
};
pub use conversion::{ConversionCostPropagator, ConversionPlan, DEFAULT_EFFICIENCY};
pub use history::{ItemHistory, TransactionHistory};
pub use records::{ConversionEvent, NewConversion, OrderKey, PurchaseLot, SaleUnit, WasteEvent};
