//! HTTP client for the node API.

use super::{
    BlacklistService, DealSettlement, LogStream, LogStreamRequest, ServiceError, TaskLogs,
};
use crate::domain::{Address, BlacklistTarget, DealId};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Node API client implementing every service the monitor consumes.
#[derive(Debug, Clone)]
pub struct NodeClient {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl NodeClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Bound the total time spent retrying a single request.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn finish_url(&self, deal_id: &DealId) -> String {
        format!("{}/deals/{}/finish", self.base_url, deal_id.as_str())
    }

    pub fn blacklist_remove_url(&self) -> String {
        format!("{}/blacklist/remove", self.base_url)
    }

    pub fn logs_url(&self, request: &LogStreamRequest) -> String {
        format!("{}/tasks/{}/logs", self.base_url, request.task_id.as_str())
    }

    /// POST with transient failures retried; only for idempotent calls.
    async fn post_json(&self, url: &str, payload: serde_json::Value) -> Result<(), ServiceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ServiceError::NetworkError(e.to_string())))?;

            check_status(response.status())
        })
        .await
    }

    /// Single POST attempt; the caller decides whether a failure is retried.
    async fn post_json_once(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(url)
            .timeout(self.max_elapsed)
            .json(payload)
            .send()
            .await
            .map_err(|e| ServiceError::NetworkError(e.to_string()))?;

        check_status(response.status()).map_err(into_service_error)
    }
}

fn into_service_error(err: backoff::Error<ServiceError>) -> ServiceError {
    match err {
        backoff::Error::Permanent(err) | backoff::Error::Transient { err, .. } => err,
    }
}

/// Map a response status onto the retry policy: 429 and 5xx are retried,
/// other failures are final.
pub(super) fn check_status(status: StatusCode) -> Result<(), backoff::Error<ServiceError>> {
    if status.is_success() {
        return Ok(());
    }

    let err = ServiceError::HttpError {
        status: status.as_u16(),
        message: status
            .canonical_reason()
            .unwrap_or("Unexpected status")
            .to_string(),
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(backoff::Error::transient(err))
    } else {
        Err(backoff::Error::permanent(err))
    }
}

#[async_trait]
impl DealSettlement for NodeClient {
    async fn finish(&self, deal_id: &DealId, target: BlacklistTarget) -> Result<(), ServiceError> {
        debug!("Finishing deal={}, blacklist={}", deal_id, target);
        // Sent once: settlement is not idempotent.
        let payload = serde_json::json!({ "blacklist": target });
        self.post_json_once(&self.finish_url(deal_id), &payload).await
    }
}

#[async_trait]
impl BlacklistService for NodeClient {
    async fn remove(&self, address: &Address) -> Result<(), ServiceError> {
        debug!("Removing {} from blacklist", address);
        let payload = serde_json::json!({ "address": address });
        self.post_json(&self.blacklist_remove_url(), payload).await
    }
}

#[async_trait]
impl TaskLogs for NodeClient {
    async fn open_log_stream(&self, request: LogStreamRequest) -> Result<LogStream, ServiceError> {
        // No retry here: the processor reopens the stream on its own schedule.
        let response = self
            .client
            .get(self.logs_url(&request))
            .query(&[
                ("deal_id", request.deal_id.as_str()),
                ("stream", "stdout"),
                ("follow", if request.follow { "true" } else { "false" }),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::NetworkError(e.to_string()))?;

        check_status(response.status()).map_err(into_service_error)?;

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ServiceError::NetworkError(e.to_string()))
            })
            .boxed())
    }
}
