pub mod aggregator;
pub mod channel;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod store;
pub mod tracker;

pub use aggregator::{BatchAggregator, BatchWatch};
pub use channel::{ChannelEvent, ChannelSettings, ChannelState, PushChannel, TransportChannel};
pub use config::{load_config, ConfigOverrides, WatchConfig};
pub use error::{ClientError, ClientResult};
pub use reconcile::{FinalRead, ReconciliationBridge};
pub use store::{JobStore, RestJobStore};
pub use tracker::{CompletionCallback, JobTracker, TrackerSettings};

use tokio::time::Instant;

/// Sleeps until `deadline`, or forever when there is none.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
