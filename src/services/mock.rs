//! In-memory node for testing without network calls.

use super::{
    BlacklistService, DealSettlement, LogStream, LogStreamRequest, PoolReports, PoolWorker,
    ServiceError, TaskLogs,
};
use crate::domain::{Address, BlacklistTarget, DealId};
use crate::engine::{encode_frame, StreamKind};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock node that records settlement and blacklist calls and serves a
/// scripted miner log.
#[derive(Debug)]
pub struct MockNode {
    finished: Mutex<Vec<(DealId, BlacklistTarget)>>,
    removed: Mutex<Vec<Address>>,
    fail_finish: AtomicBool,
    fail_remove: AtomicBool,
    remove_delay: Option<Duration>,
    log_line: Arc<Mutex<Option<String>>>,
    log_interval: Duration,
    chunks_per_stream: Option<usize>,
    failed_opens: AtomicUsize,
    opens: AtomicUsize,
}

impl MockNode {
    /// Create a mock whose log streams emit nothing but idle lines.
    pub fn new() -> Self {
        Self {
            finished: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            fail_finish: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            remove_delay: None,
            log_line: Arc::new(Mutex::new(None)),
            log_interval: Duration::from_secs(10),
            chunks_per_stream: None,
            failed_opens: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        }
    }

    /// Emit a speed report of `mh` MH/s on every log interval.
    pub fn with_hashrate(self, mh: f64) -> Self {
        self.set_hashrate(mh);
        self
    }

    /// Emit `line` verbatim on every log interval.
    pub fn with_log_line(self, line: &str) -> Self {
        *self.log_line.lock() = Some(line.to_string());
        self
    }

    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    /// End every stream after `chunks` chunks, forcing a reopen.
    pub fn with_chunks_per_stream(mut self, chunks: usize) -> Self {
        self.chunks_per_stream = Some(chunks);
        self
    }

    /// Reject the first `n` attempts to open a log stream.
    pub fn with_failed_opens(self, n: usize) -> Self {
        self.failed_opens.store(n, Ordering::SeqCst);
        self
    }

    /// Hold every blacklist removal call for `delay` before answering.
    pub fn with_remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    /// Change the reported hashrate of already open streams.
    pub fn set_hashrate(&self, mh: f64) {
        *self.log_line.lock() = Some(speed_report(mh));
    }

    /// Stop reporting speed; streams stay open but carry idle lines only.
    pub fn go_silent(&self) {
        *self.log_line.lock() = None;
    }

    pub fn set_fail_finish(&self, fail: bool) {
        self.fail_finish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn finished(&self) -> Vec<(DealId, BlacklistTarget)> {
        self.finished.lock().clone()
    }

    pub fn removed(&self) -> Vec<Address> {
        self.removed.lock().clone()
    }

    /// Number of successfully opened log streams.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A miner speed report line for `mh` MH/s.
pub fn speed_report(mh: f64) -> String {
    format!(
        "ETH - Total Speed: {:.3} Mh/s, Total Shares: 1, Rejected: 0, Time: 00:01\n",
        mh
    )
}

#[async_trait]
impl DealSettlement for MockNode {
    async fn finish(&self, deal_id: &DealId, target: BlacklistTarget) -> Result<(), ServiceError> {
        if self.fail_finish.load(Ordering::SeqCst) {
            return Err(ServiceError::Other("finish rejected".to_string()));
        }
        self.finished.lock().push((deal_id.clone(), target));
        Ok(())
    }
}

#[async_trait]
impl BlacklistService for MockNode {
    async fn remove(&self, address: &Address) -> Result<(), ServiceError> {
        if let Some(delay) = self.remove_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(ServiceError::Other("remove rejected".to_string()));
        }
        self.removed.lock().push(address.clone());
        Ok(())
    }
}

#[async_trait]
impl TaskLogs for MockNode {
    async fn open_log_stream(&self, _request: LogStreamRequest) -> Result<LogStream, ServiceError> {
        let refused = self
            .failed_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ServiceError::NetworkError("connection refused".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let line = self.log_line.clone();
        let interval = self.log_interval;
        let stream = futures::stream::unfold(line, move |line| async move {
            tokio::time::sleep(interval).await;
            let text = line
                .lock()
                .clone()
                .unwrap_or_else(|| "GPU0 t=61C fan=45%\n".to_string());
            Some((Ok(encode_frame(StreamKind::Stdout, text.as_bytes())), line))
        });

        Ok(match self.chunks_per_stream {
            Some(n) => stream.take(n).boxed(),
            None => stream.boxed(),
        })
    }
}

/// Mock pool serving scripted worker reports.
#[derive(Debug, Default)]
pub struct MockPool {
    workers: Mutex<HashMap<String, PoolWorker>>,
    fail: AtomicBool,
    polls: AtomicUsize,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `mh` MH/s for `worker_id` from now on.
    pub fn set_hashrate(&self, worker_id: &str, mh: f64) {
        self.workers.lock().insert(
            worker_id.to_string(),
            PoolWorker {
                alive: true,
                hashrate: mh,
                hashrate_calculated: mh,
            },
        );
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of answered and failed report requests.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolReports for MockPool {
    async fn worker(
        &self,
        _wallet: &Address,
        worker_id: &str,
    ) -> Result<Option<PoolWorker>, ServiceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::HttpError {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(self.workers.lock().get(worker_id).copied())
    }
}
