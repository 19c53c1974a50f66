//! Transport contract between the synchronizer and the progress API.

use async_trait::async_trait;
use prep_core::model::ProgressRecord;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

mod http;
mod local;

pub use http::{HttpConfig, HttpProgressClient};
pub use local::LocalProgressApi;

/// Uniform success/error envelope returned by every API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// `data` payload of progress calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    pub progress: ProgressRecord,
}

/// Authenticated access to the caller's progress record.
///
/// Implementations attach whatever credential they were built with; callers
/// never see it.
#[async_trait]
pub trait ProgressApi: Send + Sync {
    /// Fetch the current user's progress.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the API cannot be reached or answers
    /// with something other than an envelope.
    async fn load_progress(&self) -> Result<ApiResponse<ProgressEnvelope>, TransportError>;

    /// Persist `progress` as the current user's record.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the API cannot be reached or answers
    /// with something other than an envelope.
    async fn save_progress(
        &self,
        progress: &ProgressRecord,
    ) -> Result<ApiResponse<ProgressEnvelope>, TransportError>;
}
