use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ENV_PREFIX;

static INIT_TRACING: Once = Once::new();

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Install the global tracing subscriber. Safe to call more than once.
///
/// `RUST_LOG` overrides the default filter; `TSUKINO_RELAY_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let json = std::env::var(format!("{ENV_PREFIX}LOG_FORMAT"))
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let _ = if json {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init()
        };

        info!("relay tracing initialized");
    });
}
