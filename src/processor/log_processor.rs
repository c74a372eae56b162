//! Hashrate estimation from a task's miner log.

use super::{Processor, TaskQuality};
use crate::config::ProcessorConfig;
use crate::domain::{Deal, DealId, TaskId};
use crate::engine::{parse_hashrate, Demuxer, Ewma, LineBuffer, StreamKind, EWMA_TICK};
use crate::services::{LogStream, LogStreamRequest, ServiceError, TaskLogs};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// The most recent hashrate reported by the task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Hashes per second.
    pub value: f64,
    pub observed_at: Instant,
}

/// Follows the stdout of a mining task and smooths the reported hashrate.
///
/// Two loops share the processor while it runs: the fetch loop records the
/// latest reported speed, and the feed loop pushes it into the smoother every
/// [`EWMA_TICK`] once the warm-up is over.
#[derive(Debug)]
pub struct LogProcessor {
    config: ProcessorConfig,
    logs: Arc<dyn TaskLogs>,
    deal_id: DealId,
    task_id: TaskId,
    target: f64,
    hashrate: Ewma,
    latest: Mutex<Sample>,
    started_at: Instant,
}

impl LogProcessor {
    pub fn new(
        config: ProcessorConfig,
        logs: Arc<dyn TaskLogs>,
        deal: &Deal,
        task_id: TaskId,
    ) -> Self {
        let now = Instant::now();
        let target = deal.benchmark_hashrate;

        // Until the task reports anything it is assumed to deliver what was sold.
        let hashrate = Ewma::new(EWMA_TICK, config.smoothing_window);
        hashrate.update_rate(target);
        hashrate.tick();

        Self {
            config,
            logs,
            deal_id: deal.id.clone(),
            task_id,
            target,
            hashrate,
            latest: Mutex::new(Sample {
                value: target,
                observed_at: now,
            }),
            started_at: now,
        }
    }

    pub fn latest_sample(&self) -> Sample {
        *self.latest.lock()
    }

    /// Record a freshly observed hashrate.
    pub fn record(&self, value: f64) {
        *self.latest.lock() = Sample {
            value,
            observed_at: Instant::now(),
        };
    }

    pub fn smoothed_hashrate(&self) -> f64 {
        self.hashrate.rate()
    }

    fn process_line(&self, line: &str) {
        match parse_hashrate(line) {
            None => {}
            Some(Ok(value)) => {
                debug!(hashrate = value, "current calculated hashrate");
                self.record(value);
            }
            Some(Err(e)) => warn!(line, error = %e, "dropping malformed speed report"),
        }
    }

    /// Push one tick into the smoother, treating a stale sample as a stall.
    fn feed_tick(&self, now: Instant) {
        let sample = self.latest_sample();
        if now.saturating_duration_since(sample.observed_at) > self.config.stale_after {
            warn!(
                stale_for = ?now.saturating_duration_since(sample.observed_at),
                "no hashrate reported recently, assuming zero"
            );
            self.hashrate.update_rate(0.0);
        } else {
            debug!(hashrate = sample.value, "updating hashrate");
            self.hashrate.update_rate(sample.value);
        }
        self.hashrate.tick();
    }

    async fn feed(&self, cancel: &CancellationToken) {
        info!("starting task's warm-up");
        let warmup_left = self.config.warmup.saturating_sub(self.started_at.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(warmup_left) => {}
        }
        info!("task is warmed-up");

        let mut ticker = interval_at(Instant::now() + EWMA_TICK, EWMA_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                now = ticker.tick() => self.feed_tick(now),
            }
        }
    }

    async fn fetch_logs(&self, cancel: &CancellationToken) {
        let request = LogStreamRequest::follow_stdout(self.task_id.clone(), self.deal_id.clone());

        loop {
            debug!("requesting logs");
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = self.logs.open_log_stream(request.clone()) => opened,
            };

            match opened {
                Ok(stream) => match self.read_stream(stream, cancel).await {
                    Ok(()) if cancel.is_cancelled() => return,
                    Ok(()) => warn!("task log stream ended"),
                    Err(e) => warn!(error = %e, "stop reading logs for task"),
                },
                Err(e) => warn!(error = %e, "failed to fetch logs from the task"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.log_retry_interval) => {}
            }
        }
    }

    /// Consume a stream until it ends, fails, or the processor is cancelled.
    async fn read_stream(
        &self,
        mut stream: LogStream,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let mut demux = Demuxer::new();
        let mut lines = LineBuffer::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => chunk,
            };

            let chunk = match chunk {
                None => return Ok(()),
                Some(chunk) => chunk?,
            };

            let frames = demux
                .push(&chunk)
                .map_err(|e| ServiceError::ParseError(e.to_string()))?;
            for (kind, payload) in frames {
                if kind == StreamKind::Stdin {
                    continue;
                }
                let complete = lines
                    .push(&payload)
                    .map_err(|e| ServiceError::ParseError(e.to_string()))?;
                for line in complete {
                    self.process_line(&line);
                }
            }
        }
    }
}

#[async_trait]
impl Processor for LogProcessor {
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    async fn run(&self, cancel: CancellationToken) {
        let span = info_span!("task-logs", deal_id = %self.deal_id, task_id = %self.task_id);
        async {
            tokio::join!(self.fetch_logs(&cancel), self.feed(&cancel));
        }
        .instrument(span)
        .await
    }

    fn task_quality(&self) -> TaskQuality {
        if self.target <= 0.0 {
            return TaskQuality {
                accurate: true,
                ratio: 1.0,
            };
        }

        TaskQuality {
            accurate: self.started_at.elapsed() >= self.config.warmup,
            ratio: self.hashrate.rate() / self.target,
        }
    }
}
