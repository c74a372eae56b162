pub mod monitor;

pub use monitor::{DealStatus, MonitorError, MonitorStats, QualityMonitor, SupplierStatus};
