//! Process-wide logging setup shared by every binary that drives a run.

/// Install the JSON `tracing` subscriber.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Like [`init`], but with a fixed default filter when `RUST_LOG` is unset.
pub fn init_with_default(directive: &str) {
    tracing::init_with_default(directive);
}

/// Subscriber configuration (filters, formatting).
pub mod tracing;
