//! Logging initialisation.
//!
//! Diagnostics go to stderr through `tracing`; stdout stays reserved for
//! the per-command trace lines the external harness scrapes.

//---------------------------------------------------------------------------------------------------- Import
use tracing::level_filters::LevelFilter;

//---------------------------------------------------------------------------------------------------- init_logging
/// Install the process-wide subscriber. Call once, early in `main`.
pub fn init_logging(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
