//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize process-wide logging in the given format (e.g. parsed from a CLI flag).
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

/// Human-readable logs captured by the test harness.
pub fn init_for_tests() {
    tracing::init_test();
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::LogFormat;
