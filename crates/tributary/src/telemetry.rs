use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with an env-based filter and bridge `log` records.
///
/// Reads `RUST_LOG` for level directives (e.g. "info" or "debug,tributary=trace")
/// and falls back to `default_directive` when it is unset or malformed.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_with_default(default_directive: &str) {
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = fmt::layer().with_target(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

pub fn init() {
    init_with_default("info");
}
