//! Observability for the broker.
//!
//! - **Metrics**: [`BrokerMetrics`] counters and gauges, shared through the
//!   application context.
//! - **Spans**: one `rpc.request` span per page request, see
//!   [`rpc_request_span`].
//! - **Subscriber** (optional): enable the `subscriber` feature for a ready
//!   made `tracing-subscriber` setup.
//!
//! ```toml
//! wallet-broker = { version = "0.1", features = ["subscriber"] }
//! ```

mod metrics;
mod spans;

pub use metrics::{BrokerMetrics, Counter, Gauge, Histogram, MetricsSummary};
pub use spans::{RequestTimer, approval_span, rpc_request_span};

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "wallet_broker=info";

/// Installs a global fmt subscriber honoring `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "subscriber")]
pub fn init_tracing_subscriber() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
