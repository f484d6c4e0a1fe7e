//! Ready-made subscriber for binaries and examples built on this crate.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "taskgroup=info";

/// Install a global subscriber: `RUST_LOG` filtering (falling back to
/// `taskgroup=info`), formatted output, and progress bars for `join` spans.
///
/// Fails if a global subscriber is already set.
pub fn init() -> anyhow::Result<()> {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}
