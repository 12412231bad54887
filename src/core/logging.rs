//! Logging initialization and utilities

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable.
///
/// # Example
/// ```
/// sdf_labeler_engine::core::logging::init();
/// log::info!("Engine started");
/// ```
pub fn init() {
    // Tests and embedding hosts may have installed a logger already
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
