#![forbid(unsafe_code)]

pub mod api;
pub mod app_services;
pub mod error;
pub mod progress_service;
pub mod sync;

pub use prep_core::Clock;

pub use api::{
    ApiResponse, HttpConfig, HttpProgressClient, LocalProgressApi, ProgressApi, ProgressEnvelope,
};
pub use app_services::AppServices;
pub use error::{AppServicesError, ProgressServiceError, TransportError};
pub use progress_service::ProgressService;
pub use sync::{ProgressSynchronizer, SyncConfig, SyncOutcome, SyncStatus};
