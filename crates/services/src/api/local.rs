use std::sync::Arc;

use async_trait::async_trait;
use prep_core::model::{ProgressRecord, UserId};
use tracing::error;

use super::{ApiResponse, ProgressApi, ProgressEnvelope};
use crate::error::TransportError;
use crate::progress_service::ProgressService;

/// In-process transport bound to a single, already authenticated user.
///
/// Storage failures are answered the way the HTTP handlers answer them: an
/// unsuccessful envelope with a generic message, logged on this side.
#[derive(Clone)]
pub struct LocalProgressApi {
    service: Arc<ProgressService>,
    user_id: UserId,
}

impl LocalProgressApi {
    #[must_use]
    pub fn new(service: Arc<ProgressService>, user_id: UserId) -> Self {
        Self { service, user_id }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

const INTERNAL_ERROR: &str = "Internal server error";

#[async_trait]
impl ProgressApi for LocalProgressApi {
    async fn load_progress(&self) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
        Ok(match self.service.load(&self.user_id).await {
            Ok(stored) => ApiResponse::ok(ProgressEnvelope {
                progress: stored.progress,
            }),
            Err(err) => {
                error!(user = %self.user_id, error = %err, "load progress failed");
                ApiResponse::failure(INTERNAL_ERROR)
            }
        })
    }

    async fn save_progress(
        &self,
        progress: &ProgressRecord,
    ) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
        Ok(
            match self.service.save(&self.user_id, progress.clone()).await {
                Ok(stored) => ApiResponse::ok(ProgressEnvelope {
                    progress: stored.progress,
                }),
                Err(err) => {
                    error!(user = %self.user_id, error = %err, "save progress failed");
                    ApiResponse::failure(INTERNAL_ERROR)
                }
            },
        )
    }
}
