//! Helpers shared by test suites across the workspace.

use crate::logging;

/// Standard test setup: install a logging subscriber honoring `RUST_LOG`.
pub fn setup_test() {
    logging::Config::default().init();
}
