use super::{Address, DealId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An active resource-rental contract between a consumer and a supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub supplier: Address,
    pub consumer: Address,
    pub start_time: DateTime<Utc>,
    /// Throughput the supplier sold, in hashes per second.
    pub benchmark_hashrate: f64,
}

impl Deal {
    pub fn new(
        id: DealId,
        supplier: Address,
        consumer: Address,
        start_time: DateTime<Utc>,
        benchmark_hashrate: f64,
    ) -> Self {
        Self {
            id,
            supplier,
            consumer,
            start_time,
            benchmark_hashrate,
        }
    }

    /// Time elapsed since the deal was opened, clamped at zero.
    pub fn lifetime(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.start_time).max(chrono::Duration::zero())
    }
}
