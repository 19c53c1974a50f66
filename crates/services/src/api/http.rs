use std::env;

use async_trait::async_trait;
use prep_core::model::ProgressRecord;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

use super::{ApiResponse, ProgressApi, ProgressEnvelope};
use crate::error::TransportError;

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl HttpConfig {
    /// Reads `PREP_API_BASE_URL` and `PREP_API_TOKEN`.
    ///
    /// Returns `None` when no base URL is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("PREP_API_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let token = env::var("PREP_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        Some(Self { base_url, token })
    }
}

/// Progress API client over HTTP with bearer authentication.
#[derive(Clone)]
pub struct HttpProgressClient {
    client: Client,
    config: HttpConfig,
}

impl HttpProgressClient {
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Use a preconfigured client (timeouts, proxies).
    #[must_use]
    pub fn with_client(client: Client, config: HttpConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_envelope(
        response: Response,
    ) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
        let status = response.status();
        if !status.is_success() {
            // Handlers answer errors as `{ "error": "...", "code": "..." }`.
            let message = response
                .json::<ProgressBody>()
                .await
                .ok()
                .and_then(|body| body.error);
            return match message {
                Some(message) => Ok(ApiResponse::failure(message)),
                None => Err(TransportError::HttpStatus(status)),
            };
        }

        let body: ProgressBody = response.json().await?;
        Ok(body.into_response())
    }
}

#[async_trait]
impl ProgressApi for HttpProgressClient {
    async fn load_progress(&self) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
        let request = self.client.get(self.endpoint("api/progress/load"));
        let response = self.authorize(request).send().await?;
        Self::read_envelope(response).await
    }

    async fn save_progress(
        &self,
        progress: &ProgressRecord,
    ) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
        let request = self
            .client
            .post(self.endpoint("api/progress/save"))
            .json(progress);
        let response = self.authorize(request).send().await?;
        Self::read_envelope(response).await
    }
}

/// Body shape of the progress handlers: `{ success, progress }` or `{ error }`.
#[derive(Debug, Deserialize)]
struct ProgressBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    progress: Option<ProgressRecord>,
    #[serde(default)]
    error: Option<String>,
}

impl ProgressBody {
    fn into_response(self) -> ApiResponse<ProgressEnvelope> {
        if self.success {
            ApiResponse {
                success: true,
                data: self.progress.map(|progress| ProgressEnvelope { progress }),
                error: None,
            }
        } else {
            ApiResponse {
                success: false,
                data: None,
                error: self.error,
            }
        }
    }
}
