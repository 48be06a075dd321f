pub mod allocation;
pub mod config;
pub mod cycle;
pub mod error;
pub mod ingest;
pub mod integrity;
pub mod outreach;
pub mod record;
pub mod relationship;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod summary;
pub mod trimmer;
pub mod yield_estimator;

pub use error::*;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the log subscriber. `RUST_LOG` overrides the default `recruit=info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recruit=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
