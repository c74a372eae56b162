//! Hashrate estimation from mining pool statistics.

use super::{Processor, TaskQuality};
use crate::config::PoolConfig;
use crate::domain::{Address, Deal, DealId, TaskId};
use crate::engine::{Ewma, EWMA_TICK};
use crate::services::{PoolReports, ServiceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

const HISTORY_LEN: usize = 60;
const ZERO_WINDOW: usize = 5;

/// Follows the pool's view of a task's worker.
///
/// The pool only sees accepted shares, so a miner that lies in its log
/// still shows up here. The worker is named after the deal (`c<deal id>`)
/// and mines to the consumer's wallet.
#[derive(Debug)]
pub struct PoolProcessor {
    config: PoolConfig,
    warmup: Duration,
    pool: Arc<dyn PoolReports>,
    deal_id: DealId,
    task_id: TaskId,
    wallet: Address,
    worker_id: String,
    target: f64,
    hashrate: Ewma,
    current: Mutex<f64>,
    history: Mutex<VecDeque<f64>>,
    started_at: Instant,
}

impl PoolProcessor {
    pub fn new(
        config: PoolConfig,
        warmup: Duration,
        pool: Arc<dyn PoolReports>,
        deal: &Deal,
        task_id: TaskId,
    ) -> Self {
        Self {
            config,
            warmup,
            pool,
            deal_id: deal.id.clone(),
            task_id,
            wallet: deal.consumer.clone(),
            worker_id: format!("c{}", deal.id),
            target: deal.benchmark_hashrate,
            hashrate: Ewma::new(EWMA_TICK, config.smoothing_window),
            current: Mutex::new(deal.benchmark_hashrate),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
            started_at: Instant::now(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn smoothed_hashrate(&self) -> f64 {
        self.hashrate.rate()
    }

    fn record(&self, value: f64) {
        *self.current.lock() = value;
        let mut history = self.history.lock();
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(value);
    }

    /// False once the pool reported zero for the last few polls in a row.
    fn nonzero_hashrate(&self) -> bool {
        let history = self.history.lock();
        if history.len() < ZERO_WINDOW {
            return true;
        }
        history.iter().rev().take(ZERO_WINDOW).any(|v| *v > 0.0)
    }

    fn feed_tick(&self) {
        self.hashrate.update_rate(*self.current.lock());
        self.hashrate.tick();
    }

    async fn poll(&self) -> Result<(), ServiceError> {
        let worker = self
            .pool
            .worker(&self.wallet, &self.worker_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Other(format!("cannot find worker {} in pool report", self.worker_id))
            })?;

        info!(
            reported = worker.hashrate,
            calculated = worker.hashrate_calculated,
            "task hashrate"
        );
        self.record(worker.effective_hashrate());
        Ok(())
    }

    async fn watch(&self, cancel: &CancellationToken) {
        info!("starting task's warm-up");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(self.warmup.saturating_sub(self.started_at.elapsed())) => {}
        }
        debug!(wallet = %self.wallet, "warm-up complete, starting watcher");

        let mut ewma_tick = interval_at(Instant::now() + EWMA_TICK, EWMA_TICK);
        ewma_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut track = interval_at(Instant::now(), self.config.track_interval);
        track.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ewma_tick.tick() => self.feed_tick(),
                _ = track.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        polled = self.poll() => if let Err(e) = polled {
                            warn!(error = %e, "failed to load pool data");
                        },
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Processor for PoolProcessor {
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    async fn run(&self, cancel: CancellationToken) {
        let span = info_span!(
            "pool-reports",
            deal_id = %self.deal_id,
            task_id = %self.task_id,
            worker_id = %self.worker_id
        );
        self.watch(&cancel).instrument(span).await
    }

    fn task_quality(&self) -> TaskQuality {
        if self.target <= 0.0 {
            return TaskQuality {
                accurate: true,
                ratio: 1.0,
            };
        }

        let ratio = if self.nonzero_hashrate() {
            self.hashrate.rate() / self.target
        } else {
            0.0
        };
        TaskQuality {
            accurate: self.started_at.elapsed() >= self.config.accuracy_delay,
            ratio,
        }
    }
}
