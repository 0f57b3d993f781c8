//! Utilities for logging.

use tracing_subscriber::EnvFilter;

/// Log verbosity, convertible from the count of repeated verbosity flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Info,
    Debug,
    Trace,
}

impl From<u8> for Verbosity {
    fn from(value: u8) -> Self {
        match value {
            0 => Verbosity::Info,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl Verbosity {
    const fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// An explicit `RUST_LOG` takes precedence over the provided verbosity.
/// Calling this more than once has no effect beyond the first call.
pub fn init(verbosity: impl Into<Verbosity>) {
    let verbosity = verbosity.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
