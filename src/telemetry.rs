//! Log output setup.
use std::sync::Once;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Install the global tracing subscriber. Only the first call has an effect.
///
/// `RUST_LOG` takes precedence over `default_level`. Logs go to stderr, stdout only carries
/// results.
///
/// ```no_run
/// prom_label_enforcer::telemetry::init("info");
/// tracing::info!("started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("prom_label_enforcer={default_level}")));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
