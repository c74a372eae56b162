use crate::domain::{Deal, DealId};
use crate::processor::Processor;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DealState {
    /// Opened, no task attached yet.
    Registered,
    /// A processor is watching the deal's task.
    Tracking,
}

/// A deal plus the processors watching its task, if any.
#[derive(Debug, Clone)]
pub struct DealRecord {
    pub deal: Deal,
    /// Quality as seen in the task's own logs.
    pub processor: Option<Arc<dyn Processor>>,
    /// Quality as seen by the mining pool.
    pub pool_processor: Option<Arc<dyn Processor>>,
    cancel: Option<CancellationToken>,
}

impl DealRecord {
    pub fn new(deal: Deal) -> Self {
        Self {
            deal,
            processor: None,
            pool_processor: None,
            cancel: None,
        }
    }

    pub fn state(&self) -> DealState {
        match self.processor {
            Some(_) => DealState::Tracking,
            None => DealState::Registered,
        }
    }

    /// Stop the attached processors, if any are running.
    pub fn stop_processor(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

/// Concurrency-safe map of deal id to record. At most one record per id.
#[derive(Debug, Default)]
pub struct DealRegistry {
    records: RwLock<HashMap<DealId, DealRecord>>,
}

impl DealRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DealId) -> Option<DealRecord> {
        self.records.read().get(id).cloned()
    }

    /// Insert a record, returning the one it replaced.
    pub fn put(&self, record: DealRecord) -> Option<DealRecord> {
        self.records.write().insert(record.deal.id.clone(), record)
    }

    pub fn delete(&self, id: &DealId) -> Option<DealRecord> {
        self.records.write().remove(id)
    }

    /// Put back a record taken out with [`delete`](Self::delete).
    ///
    /// Returns the record when its id was registered again in the meantime;
    /// the newer registration wins.
    pub fn restore(&self, record: DealRecord) -> Option<DealRecord> {
        match self.records.write().entry(record.deal.id.clone()) {
            Entry::Occupied(_) => Some(record),
            Entry::Vacant(slot) => {
                slot.insert(record);
                None
            }
        }
    }

    /// Attach the task processors to a registered deal.
    ///
    /// Returns `None` when the deal is unknown, otherwise the record as it
    /// was before attaching so the caller can stop replaced processors.
    pub fn attach(
        &self,
        id: &DealId,
        processor: Arc<dyn Processor>,
        pool_processor: Arc<dyn Processor>,
        cancel: CancellationToken,
    ) -> Option<DealRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        let previous = record.clone();
        record.processor = Some(processor);
        record.pool_processor = Some(pool_processor);
        record.cancel = Some(cancel);
        Some(previous)
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> Vec<DealRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
