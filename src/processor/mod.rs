//! Per-task processors that turn task output into a quality estimate.

use crate::config::{PoolConfig, ProcessorConfig, ProcessorFormat};
use crate::domain::{Deal, TaskId};
use crate::services::{PoolReports, TaskLogs};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod log_processor;
pub mod pool_processor;

pub use log_processor::{LogProcessor, Sample};
pub use pool_processor::PoolProcessor;

/// Delivered throughput relative to what was sold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskQuality {
    /// False while the processor is still warming up; the ratio must be
    /// ignored until then.
    pub accurate: bool,
    pub ratio: f64,
}

/// Continuously processes results of a task's execution and estimates its
/// quality.
#[async_trait]
pub trait Processor: Send + Sync + fmt::Debug {
    fn task_id(&self) -> &TaskId;

    /// Run until `cancel` fires.
    async fn run(&self, cancel: CancellationToken);

    fn task_quality(&self) -> TaskQuality;
}

/// Processor that trusts the task unconditionally.
#[derive(Debug, Clone)]
pub struct DisabledProcessor {
    task_id: TaskId,
}

impl DisabledProcessor {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }
}

#[async_trait]
impl Processor for DisabledProcessor {
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    async fn run(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
    }

    fn task_quality(&self) -> TaskQuality {
        TaskQuality {
            accurate: true,
            ratio: 1.0,
        }
    }
}

/// Builds the processor variants selected by configuration.
///
/// Without [`with_pool`](Self::with_pool) the pool signal is disabled.
#[derive(Debug, Clone)]
pub struct ProcessorFactory {
    format: ProcessorFormat,
    config: ProcessorConfig,
    logs: Arc<dyn TaskLogs>,
    pool: Option<(PoolConfig, Arc<dyn PoolReports>)>,
}

impl ProcessorFactory {
    pub fn new(format: ProcessorFormat, config: ProcessorConfig, logs: Arc<dyn TaskLogs>) -> Self {
        Self {
            format,
            config,
            logs,
            pool: None,
        }
    }

    pub fn with_pool(mut self, config: PoolConfig, pool: Arc<dyn PoolReports>) -> Self {
        self.pool = Some((config, pool));
        self
    }

    /// Processor watching the pool's statistics for the task's worker.
    pub fn build_pool(&self, deal: &Deal, task_id: TaskId) -> Arc<dyn Processor> {
        match &self.pool {
            Some((config, pool)) => Arc::new(PoolProcessor::new(
                *config,
                self.config.warmup,
                pool.clone(),
                deal,
                task_id,
            )),
            None => Arc::new(DisabledProcessor::new(task_id)),
        }
    }

    /// Processor watching the task's own log output.
    pub fn build(&self, deal: &Deal, task_id: TaskId) -> Arc<dyn Processor> {
        match self.format {
            ProcessorFormat::Common => Arc::new(LogProcessor::new(
                self.config,
                self.logs.clone(),
                deal,
                task_id,
            )),
            ProcessorFormat::Disabled => Arc::new(DisabledProcessor::new(task_id)),
        }
    }
}
