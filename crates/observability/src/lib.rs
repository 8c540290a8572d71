//! Process-wide logging setup shared by fieldbook binaries and tests.

/// Subscriber construction (filters, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize logging with the format named by `FIELDBOOK_LOG_FORMAT`
/// (JSON unless it says `pretty`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    crate::tracing::init(LogFormat::from_env());
}

/// Initialize logging with an explicit format.
pub fn init_with(format: LogFormat) {
    crate::tracing::init(format);
}
