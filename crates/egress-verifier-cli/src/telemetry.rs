//! Logging setup
//!
//! Installs a `tracing` subscriber filtered by `RUST_LOG` (default `info`),
//! writing either human-readable lines or JSON objects to stderr so stdout
//! stays reserved for the validation report.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Initialize logging; `json` selects structured output
pub fn init_logging(json: bool, verbose: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,hyper=warn,reqwest=warn")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    let (plain, structured) = if json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain)
        .with(structured)
        .try_init()
        .map_err(|e| Error::Telemetry(e.to_string()))
}
