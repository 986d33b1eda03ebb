//! Telemetry and Observability
//!
//! Structured logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,chat_core=debug,sqlx=warn,tower_http=debug";

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default
/// filter; `json` selects machine-readable output.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt_layer.json()).init();
    } else {
        registry.with(fmt_layer).init();
    }

    tracing::info!(json, "Tracing initialized");
}

/// Whether the configured log format asks for JSON.
pub fn wants_json(log_format: &str) -> bool {
    log_format.eq_ignore_ascii_case("json")
}
