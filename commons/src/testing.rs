//! Helpers for tests.

/// Initialize logging for a test, ignoring repeated initialization.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
