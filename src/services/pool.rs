//! Dwarfpool statistics client.

use super::node::check_status;
use super::{PoolReports, PoolWorker, ServiceError};
use crate::domain::Address;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DWARFPOOL_API_URL: &str = "http://dwarfpool.com/eth/api";

#[derive(Debug, Deserialize)]
struct WalletReport {
    #[serde(default)]
    workers: HashMap<String, PoolWorker>,
}

/// Reads per-worker hashrate from the pool's public wallet API.
#[derive(Debug, Clone)]
pub struct DwarfPoolClient {
    client: Client,
    api_url: String,
    max_elapsed: Duration,
}

impl DwarfPoolClient {
    pub fn new(api_url: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
            max_elapsed: Duration::from_secs(30),
        }
    }

    pub fn default_url() -> Self {
        Self::new(DWARFPOOL_API_URL.to_string())
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn fetch_wallet(&self, wallet: &Address) -> Result<WalletReport, ServiceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };
        let wallet = wallet.as_str().to_lowercase();

        let body = retry(backoff, || async {
            let response = self
                .client
                .get(&self.api_url)
                .query(&[("wallet", wallet.as_str())])
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ServiceError::NetworkError(e.to_string())))?;

            check_status(response.status())?;

            response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(ServiceError::NetworkError(e.to_string())))
        })
        .await?;

        parse_wallet_report(&body)
    }
}

fn parse_wallet_report(body: &str) -> Result<WalletReport, ServiceError> {
    serde_json::from_str(body).map_err(|e| ServiceError::ParseError(e.to_string()))
}

#[async_trait]
impl PoolReports for DwarfPoolClient {
    async fn worker(
        &self,
        wallet: &Address,
        worker_id: &str,
    ) -> Result<Option<PoolWorker>, ServiceError> {
        debug!(wallet = %wallet, worker_id, "fetching pool report");
        let mut report = self.fetch_wallet(wallet).await?;
        Ok(report.workers.remove(worker_id))
    }
}
