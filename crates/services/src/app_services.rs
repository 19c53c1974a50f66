use std::sync::Arc;

use prep_core::model::UserId;
use storage::repository::Storage;

use crate::Clock;
use crate::api::{HttpConfig, HttpProgressClient, LocalProgressApi, ProgressApi};
use crate::error::AppServicesError;
use crate::progress_service::ProgressService;
use crate::sync::{ProgressSynchronizer, SyncConfig};

/// Assembles the progress transport for one signed-in user.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    user_id: UserId,
    api: Arc<dyn ProgressApi>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage in this process.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        user_id: UserId,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::with_storage(&storage, clock, user_id))
    }

    /// Build services over an existing storage bundle.
    #[must_use]
    pub fn with_storage(storage: &Storage, clock: Clock, user_id: UserId) -> Self {
        let service = Arc::new(ProgressService::new(clock, Arc::clone(&storage.progress)));
        let api = Arc::new(LocalProgressApi::new(service, user_id.clone()));
        Self {
            clock,
            user_id,
            api,
        }
    }

    /// Build services talking to a remote progress API.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Config` if the base URL is not an HTTP(S) URL.
    pub fn new_remote(
        config: HttpConfig,
        clock: Clock,
        user_id: UserId,
    ) -> Result<Self, AppServicesError> {
        let base = config.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AppServicesError::Config(format!(
                "progress API base URL must start with http:// or https://, got {base:?}"
            )));
        }
        Ok(Self {
            clock,
            user_id,
            api: Arc::new(HttpProgressClient::new(config)),
        })
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn api(&self) -> Arc<dyn ProgressApi> {
        Arc::clone(&self.api)
    }

    /// A fresh synchronizer over this transport.
    #[must_use]
    pub fn synchronizer(&self, config: SyncConfig) -> ProgressSynchronizer {
        ProgressSynchronizer::with_config(self.api(), self.clock, config)
    }
}
