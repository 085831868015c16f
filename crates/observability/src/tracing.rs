//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize from the environment: `RUST_LOG`, falling back to `info`, JSON lines.
pub fn init() {
    init_with("info", true);
}

/// Initialize with an explicit default filter and output format.
///
/// `RUST_LOG` still wins over `default_filter` when set. Returns whether this
/// call installed the global subscriber.
pub fn init_with(default_filter: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_with("debug", false);
        assert!(!init_with("info", true));
        init();
    }
}
