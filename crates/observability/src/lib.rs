//! Tracing and log correlation (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

/// Per-delivery correlation.
pub mod correlation;

pub use correlation::{DELIVERY_ID_HEADER, delivery_id, delivery_span};
pub use tracing::LogFormat;
