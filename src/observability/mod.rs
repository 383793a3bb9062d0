//! Observability subsystem
//!
//! - Structured logging through `tracing`, every line tagged with an `Event`
//! - Lock-free counters and gauges in `MetricsRegistry`
//!
//! # Usage
//!
//! ```ignore
//! use qindex::observability::{init_logging, Event, MetricsRegistry};
//!
//! init_logging("qindex=debug");
//! tracing::info!(event = %Event::SchemaLoaded, collections = 3);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_queries_executed();
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global fmt subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this more than
/// once is harmless: later calls leave the first subscriber in place.
pub fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
