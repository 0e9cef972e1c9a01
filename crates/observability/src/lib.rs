//! Tracing/logging setup shared by every ForgePOS binary.

/// Initialize process-wide logging with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize process-wide logging with an explicit output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

pub use crate::tracing::LogFormat;

/// Tracing configuration (filters, layers).
pub mod tracing;
