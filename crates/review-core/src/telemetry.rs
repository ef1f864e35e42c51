//! Logging setup for the `nix-review` binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives for nix-review, checked before `RUST_LOG`.
pub const LOG_FILTER_ENV: &str = "NIX_REVIEW_LOG";

fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber on stderr; stdout belongs to the report.
///
/// `level` applies when neither `NIX_REVIEW_LOG` nor `RUST_LOG` is set.
/// Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(log_filter(level));
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    installed.ok();
}
