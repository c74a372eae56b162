pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod processor;
pub mod registry;
pub mod services;

pub use config::{Config, PoolConfig, PoolFormat, ProcessorConfig, ProcessorFormat};
pub use domain::{Address, BlacklistTarget, Deal, DealId, TaskId};
pub use error::AppError;
pub use orchestration::{MonitorError, QualityMonitor};
pub use processor::{
    DisabledProcessor, LogProcessor, PoolProcessor, Processor, ProcessorFactory, TaskQuality,
};
pub use registry::{BlacklistRegistry, DealRegistry, PenaltyWindow};
pub use services::{
    BlacklistService, DealSettlement, DwarfPoolClient, MockNode, MockPool, NodeClient,
    PoolReports, ServiceError, TaskLogs,
};
