pub mod blob_store;
pub mod config;
pub mod error;
pub mod growth_category;
pub mod memory_config;
pub mod metadata_source;
pub mod pipeline;
pub mod production_index;
pub mod report;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod streaming_merge;
pub mod tables;
pub mod task;
pub mod task_selector;

pub use error::*;
pub use pipeline::{MergeOutcome, MergeReport, Pipeline};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Calling it again after a subscriber is set is a no-op.
pub fn init_tracing(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(service, "tracing initialised");
    }
}
