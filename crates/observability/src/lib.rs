//! Process-wide tracing setup.

/// Initialize tracing with `RUST_LOG` (default `info`) and JSON output.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    self::tracing::init();
}

pub use self::tracing::init_with;

/// Subscriber configuration (filters, output format).
pub mod tracing;
