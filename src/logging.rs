//! Tracing initialization.
//!
//! Log records go to **stderr** so stdout stays parseable. The filter is
//! read from `CMAP_LOG` (e.g. `CMAP_LOG=control_mapper=debug`) and falls
//! back to `info`. `--log-json` switches to one JSON object per line.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub const LOG_ENV: &str = "CMAP_LOG";

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(json: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true);

        if json {
            builder.json().init();
        } else {
            builder.init();
        }
    });
}
