//! Abstractions over the node services the monitor depends on.

use crate::domain::{Address, BlacklistTarget, DealId, TaskId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::fmt;

pub mod mock;
pub mod node;
pub mod pool;

pub use mock::{MockNode, MockPool};
pub use node::NodeClient;
pub use pool::DwarfPoolClient;

/// Raw chunks of a task's multiplexed log output.
pub type LogStream = BoxStream<'static, Result<Vec<u8>, ServiceError>>;

/// Request for a task's stdout, which is where miners report their speed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStreamRequest {
    pub task_id: TaskId,
    pub deal_id: DealId,
    pub follow: bool,
}

impl LogStreamRequest {
    pub fn follow_stdout(task_id: TaskId, deal_id: DealId) -> Self {
        Self {
            task_id,
            deal_id,
            follow: true,
        }
    }
}

/// Closes deals on chain.
#[async_trait]
pub trait DealSettlement: Send + Sync + fmt::Debug {
    /// Finish a deal, optionally blacklisting its supplier.
    ///
    /// Called at most once per settlement.
    async fn finish(&self, deal_id: &DealId, target: BlacklistTarget) -> Result<(), ServiceError>;
}

/// Streams logs of tasks running on the worker.
#[async_trait]
pub trait TaskLogs: Send + Sync + fmt::Debug {
    /// Open a log stream; it ends on EOF or on a transport error.
    async fn open_log_stream(&self, request: LogStreamRequest) -> Result<LogStream, ServiceError>;
}

/// Market blacklist management.
#[async_trait]
pub trait BlacklistService: Send + Sync + fmt::Debug {
    async fn remove(&self, address: &Address) -> Result<(), ServiceError>;
}

/// One worker's entry in a mining pool report, rates in MH/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PoolWorker {
    #[serde(default)]
    pub alive: bool,
    /// Rate the miner reports to the pool.
    #[serde(default)]
    pub hashrate: f64,
    /// Rate the pool derives from accepted shares.
    #[serde(default)]
    pub hashrate_calculated: f64,
}

impl PoolWorker {
    /// Hashes per second, preferring the pool's own estimate.
    pub fn effective_hashrate(&self) -> f64 {
        let mh = if self.hashrate_calculated > 0.0 {
            self.hashrate_calculated
        } else {
            self.hashrate
        };
        mh * 1e6
    }
}

/// Hashrate statistics published by the mining pool.
#[async_trait]
pub trait PoolReports: Send + Sync + fmt::Debug {
    /// Current report for `worker_id` mining to `wallet`, `None` when the
    /// pool does not know the worker.
    async fn worker(
        &self,
        wallet: &Address,
        worker_id: &str,
    ) -> Result<Option<PoolWorker>, ServiceError>;
}

/// Error type for node service calls.
#[derive(Debug, Clone)]
pub enum ServiceError {
    /// Network error (e.g., connection refused, stream reset)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (malformed response)
    ParseError(String),
    /// Other error
    Other(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ServiceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            ServiceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ServiceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}
