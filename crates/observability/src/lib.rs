//! Process-wide tracing setup.

/// Initialize tracing with the default `info` level.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Initialize tracing, falling back to `default_level` when `RUST_LOG` is unset.
pub fn init_with_level(default_level: &str) {
    tracing::init(default_level);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
