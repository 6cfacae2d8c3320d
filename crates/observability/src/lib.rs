//! Process-wide tracing/logging setup.

/// Initialize process-wide logging.
///
/// The output format comes from `LOG_FORMAT` (`json` unless set to `pretty`),
/// the filter from `RUST_LOG` (default `info`). Safe to call multiple times;
/// subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::LogFormat;
