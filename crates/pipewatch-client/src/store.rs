//! Read-only REST client for the job store.
//!
//! The tracking core never writes to the store. It reads three resources:
//!
//! 1. `GET /jobs/{id}` for a job snapshot
//! 2. `GET /jobs/{id}/results` for final scores once a job completed
//! 3. `GET /jobs?batch_id=..&page=..&per_page=..` to list a batch

use async_trait::async_trait;
use pipewatch_core::snapshot::{JobPage, JobResult, JobSnapshot};
use pipewatch_core::JobId;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::WatchConfig;
use crate::error::{ClientError, ClientResult};

const USER_AGENT: &str = concat!("pipewatch/", env!("CARGO_PKG_VERSION"));

/// Source of authoritative job state.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn job(&self, job_id: &JobId) -> ClientResult<JobSnapshot>;

    async fn job_results(&self, job_id: &JobId) -> ClientResult<JobResult>;

    async fn batch_page(&self, batch_id: &str, page: u32, per_page: u32) -> ClientResult<JobPage>;
}

#[derive(Clone)]
pub struct RestJobStore {
    client: Client,
    // no trailing slash
    base_url: String,
    auth_token: Option<String>,
}

impl std::fmt::Debug for RestJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestJobStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RestJobStore {
    pub fn new(config: &WatchConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(std::time::Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.as_str().trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        } else {
            let message = response.text().await.unwrap_or_default();

            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Err(ClientError::AuthFailed(message))
                }
                StatusCode::NOT_FOUND => Err(ClientError::NotFound(message)),
                _ => Err(ClientError::ApiError {
                    status: status.as_u16(),
                    message,
                }),
            }
        }
    }
}

#[async_trait]
impl JobStore for RestJobStore {
    #[instrument(skip(self))]
    async fn job(&self, job_id: &JobId) -> ClientResult<JobSnapshot> {
        let url = self.url(&format!("/jobs/{job_id}"));
        debug!("Getting job snapshot from {}", url);

        let response = self.get(&url).send().await?;
        self.handle_response(response).await
    }

    #[instrument(skip(self))]
    async fn job_results(&self, job_id: &JobId) -> ClientResult<JobResult> {
        let url = self.url(&format!("/jobs/{job_id}/results"));
        debug!("Getting job results from {}", url);

        let response = self.get(&url).send().await?;
        self.handle_response(response).await
    }

    #[instrument(skip(self))]
    async fn batch_page(&self, batch_id: &str, page: u32, per_page: u32) -> ClientResult<JobPage> {
        let url = self.url("/jobs");
        debug!("Listing batch {} page {} from {}", batch_id, page, url);

        let response = self
            .get(&url)
            .query(&[
                ("batch_id", batch_id.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await?;
        self.handle_response(response).await
    }
}
