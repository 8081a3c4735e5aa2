use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const ACCOUNTS_CLAIMED: &str = "acctsync_accounts_claimed_total";
pub const FETCH_FAILURES: &str = "acctsync_fetch_failures_total";
pub const SNAPSHOTS_STAGED: &str = "acctsync_snapshots_staged_total";
pub const TRANSACTIONS_INSERTED: &str = "acctsync_transactions_inserted_total";
pub const NORMALIZE_FAILURES: &str = "acctsync_normalize_failures_total";
pub const FETCH_DURATION: &str = "acctsync_fetch_duration_seconds";

/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}

pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
