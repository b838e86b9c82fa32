use async_trait::async_trait;
use jobwatch_common::{DependentEntitySnapshot, EntityId, JobId, JobStatusSnapshot, SourceError};
use jobwatch_sync::StatusSource;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::{ClientConfig, endpoint};

/// Pull-side client: `GET {api}/jobs/{jobId}/status` and `GET {api}/entities/{entityId}`.
pub struct HttpStatusSource {
    base: Url,
    client: reqwest::Client,
}

impl HttpStatusSource {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base: config.api_base.clone(),
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| classify_request_error(&url, err))?;

        if let Some(err) = classify_status(&url, response.status()) {
            return Err(err);
        }

        response.json::<T>().await.map_err(|err| {
            SourceError::Unexpected(format!("failed to decode response from {url}: {err}"))
        })
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusSnapshot, SourceError> {
        let url = endpoint(&self.base, &["jobs", job_id.as_str(), "status"]);
        self.get_json(url).await
    }

    async fn fetch_entity(
        &self,
        entity_id: &EntityId,
    ) -> Result<DependentEntitySnapshot, SourceError> {
        let url = endpoint(&self.base, &["entities", entity_id.as_str()]);
        self.get_json(url).await
    }
}

fn classify_status(url: &Url, status: StatusCode) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::NOT_FOUND {
        return Some(SourceError::NotFound(url.to_string()));
    }
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        return Some(SourceError::Transport(format!(
            "{url} returned status {status}"
        )));
    }
    Some(SourceError::Unexpected(format!("{url} returned status {status}")))
}

fn classify_request_error(url: &Url, err: reqwest::Error) -> SourceError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        SourceError::Transport(format!("request to {url} failed: {err}"))
    } else {
        SourceError::Unexpected(format!("request to {url} failed: {err}"))
    }
}
