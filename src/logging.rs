//! # Logging module
//!
//! This module provides logging facilities and helpers

use tracing::Level;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
}

// -----------------------------------------------------------------------------
// helpers

pub const fn level(verbosity: usize) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// `dev_logging` selects the human-readable ANSI encoder (spec §6: "never in
/// prod"); the default is the JSON encoder production log pipelines expect.
pub fn initialize(verbosity: usize, dev_logging: bool) -> Result<(), Error> {
    let max_level = level(verbosity);
    if dev_logging {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_max_level(max_level)
                .with_thread_names(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_ansi(true)
                .finish(),
        )
        .map_err(Error::GlobalDefaultSubscriber)
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .json()
                .with_max_level(max_level)
                .with_thread_names(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_current_span(true)
                .finish(),
        )
        .map_err(Error::GlobalDefaultSubscriber)
    }
}
