//! Client-side progress synchronization.

mod config;
mod synchronizer;

pub use config::SyncConfig;
pub use synchronizer::{ProgressSynchronizer, SyncOutcome, SyncStatus};
