//! Logger setup for binaries and tests embedding the engine
//!
//! The library itself only writes through the `log` facade.

use log::LevelFilter;

/// Map a `-v` count to a level; `quiet` wins over verbosity
pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install an `env_logger` at the level chosen by `verbosity`
///
/// `RUST_LOG` still overrides per-module levels. Calling this twice is
/// harmless; the second call keeps the first logger.
pub fn init(verbosity: u8, quiet: bool) {
    let result = env_logger::Builder::new()
        .filter_level(level_for(verbosity, quiet))
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
    if result.is_err() {
        log::debug!("logger already initialised");
    }
}
