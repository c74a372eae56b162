use crate::config::{Config, PoolFormat};
use crate::domain::{Address, BlacklistTarget, Deal, DealId, TaskId};
use crate::processor::{ProcessorFactory, TaskQuality};
use crate::registry::{try_lift, BlacklistRegistry, DealRecord, DealRegistry, DealState};
use crate::services::{BlacklistService, DealSettlement, PoolReports, ServiceError, TaskLogs};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches task quality of open deals and evicts suppliers that
/// under-deliver.
///
/// The marketplace glue calls [`deal_opened`](Self::deal_opened) when a deal
/// becomes active, [`track_task`](Self::track_task) for every task started
/// under it and [`finish_deal`](Self::finish_deal) when it completes
/// normally. [`run`](Self::run) drives periodic reconciliation.
#[derive(Debug)]
pub struct QualityMonitor {
    config: Config,
    deals: DealRegistry,
    blacklist: BlacklistRegistry,
    processors: ProcessorFactory,
    settlement: Arc<dyn DealSettlement>,
    blacklist_service: Arc<dyn BlacklistService>,
    blacklisted_deals: AtomicU64,
}

impl QualityMonitor {
    pub fn new(
        config: Config,
        settlement: Arc<dyn DealSettlement>,
        blacklist_service: Arc<dyn BlacklistService>,
        logs: Arc<dyn TaskLogs>,
    ) -> Self {
        let processors = ProcessorFactory::new(config.log_processor, config.processor, logs);
        Self {
            config,
            deals: DealRegistry::new(),
            blacklist: BlacklistRegistry::new(),
            processors,
            settlement,
            blacklist_service,
            blacklisted_deals: AtomicU64::new(0),
        }
    }

    /// Cross-check log quality against pool statistics when the pool
    /// processor is configured.
    pub fn with_pool_reports(mut self, pool: Arc<dyn PoolReports>) -> Self {
        match self.config.pool_processor {
            PoolFormat::Dwarf => {
                self.processors = self.processors.with_pool(self.config.pool, pool);
            }
            PoolFormat::Disabled => debug!("pool processor disabled, ignoring pool reports"),
        }
        self
    }

    /// Reconcile every `reconcile_interval` until `cancel` fires.
    ///
    /// A pass still waiting on the node when `cancel` fires is abandoned.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("starting quality monitor");
        let period = self.config.reconcile_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.reconcile_all() => {}
            }
        }
        info!("quality monitor stopped");
    }

    /// Register a deal, replacing any previous record with the same id.
    pub fn deal_opened(&self, deal: Deal) -> Result<(), MonitorError> {
        info!(deal_id = %deal.id, supplier = %deal.supplier, "registering deal");
        self.blacklist.get_or_create(&deal.supplier);

        if let Some(replaced) = self.deals.put(DealRecord::new(deal)) {
            if replaced.state() == DealState::Tracking {
                warn!(deal_id = %replaced.deal.id, "deal registered again, dropping its task processor");
            }
            replaced.stop_processor();
        }
        Ok(())
    }

    /// Watch `task_id` of an already registered deal.
    ///
    /// Blocks until `cancel` fires or the deal is settled, so callers run it
    /// on its own task.
    pub async fn track_task(
        &self,
        cancel: &CancellationToken,
        deal: &Deal,
        task_id: TaskId,
    ) -> Result<(), MonitorError> {
        let processor = self.processors.build(deal, task_id.clone());
        let pool_processor = self.processors.build_pool(deal, task_id.clone());
        let token = cancel.child_token();

        let previous = self
            .deals
            .attach(
                &deal.id,
                processor.clone(),
                pool_processor.clone(),
                token.clone(),
            )
            .ok_or_else(|| MonitorError::DealNotFound(deal.id.clone()))?;
        if let Some(old) = &previous.processor {
            warn!(deal_id = %deal.id, task_id = %old.task_id(), "replacing task processor");
        }
        previous.stop_processor();

        debug!(deal_id = %deal.id, task_id = %task_id, "start task tracking");
        tokio::join!(processor.run(token.clone()), pool_processor.run(token));
        debug!(deal_id = %deal.id, task_id = %task_id, "stop task tracking");
        Ok(())
    }

    /// Settle a deal that completed normally; nobody is blacklisted.
    ///
    /// A deal that is no longer registered was already settled and is left
    /// alone. On failure the deal stays registered and the error is returned.
    pub async fn finish_deal(&self, deal: &Deal) -> Result<(), MonitorError> {
        // Taking the record out keeps a concurrent forced settlement away.
        let Some(record) = self.deals.delete(&deal.id) else {
            debug!(deal_id = %deal.id, "deal already settled");
            return Ok(());
        };

        if let Err(e) = self.settle(&record.deal, BlacklistTarget::Nobody).await {
            if let Some(stale) = self.deals.restore(record) {
                stale.stop_processor();
            }
            return Err(e.into());
        }
        record.stop_processor();
        Ok(())
    }

    /// One reconciliation pass over every tracked deal and every supplier.
    pub async fn reconcile_all(&self) {
        debug!("checking deals");
        let required = self.config.quality_threshold;

        for record in self.deals.snapshot() {
            let Some(processor) = &record.processor else {
                debug!(deal_id = %record.deal.id, "skipping deal without task");
                continue;
            };

            let by_logs = processor.task_quality();
            // Pool statistics lag far behind the logs; a task without
            // accurate logs is never judged.
            if !by_logs.accurate {
                continue;
            }
            let by_pool = record
                .pool_processor
                .as_ref()
                .map(|p| p.task_quality())
                .unwrap_or(TaskQuality {
                    accurate: true,
                    ratio: 1.0,
                });

            let window = self.blacklist.get_or_create(&record.deal.supplier);
            let failed_by_logs = by_logs.ratio < required;
            let failed_by_pool = by_pool.accurate && by_pool.ratio < required;
            if failed_by_logs || failed_by_pool {
                warn!(
                    deal_id = %record.deal.id,
                    task_id = %processor.task_id(),
                    by_logs = by_logs.ratio,
                    by_pool = by_pool.ratio,
                    failed_by_logs,
                    failed_by_pool,
                    required,
                    "task quality is less than required, closing deal"
                );
                window.lock().failure_at(Utc::now());
                self.force_settle(&record.deal.id).await;
            } else {
                debug!(
                    deal_id = %record.deal.id,
                    by_logs = by_logs.ratio,
                    by_pool = by_pool.ratio,
                    required,
                    "task quality fits the required value"
                );
                window.lock().success_at(Utc::now());
            }
        }

        let mut lifted = 0usize;
        for (address, window) in self.blacklist.entries() {
            // Failures are logged by try_lift and retried on the next pass.
            if let Ok(true) =
                try_lift(&address, &window, self.blacklist_service.as_ref(), Utc::now()).await
            {
                lifted += 1;
            }
        }
        debug!(lifted, "stop checking deals");
    }

    /// Remove a failing deal, stop its processor and close it with the
    /// supplier blacklisted.
    async fn force_settle(&self, deal_id: &DealId) {
        // Already finished through the normal path since the snapshot.
        let Some(record) = self.deals.delete(deal_id) else {
            return;
        };
        record.stop_processor();

        self.blacklisted_deals.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.settle(&record.deal, BlacklistTarget::Supplier).await {
            warn!(deal_id = %deal_id, error = %e, "cannot finish deal");
        }
    }

    async fn settle(&self, deal: &Deal, target: BlacklistTarget) -> Result<(), ServiceError> {
        info!(
            deal_id = %deal.id,
            lifetime_secs = deal.lifetime(Utc::now()).num_seconds(),
            blacklist = %target,
            "finishing deal"
        );
        self.settlement.finish(&deal.id, target).await
    }

    /// Status of every registered deal.
    pub fn deals(&self) -> Vec<DealStatus> {
        let mut deals: Vec<DealStatus> = self
            .deals
            .snapshot()
            .into_iter()
            .map(|record| DealStatus {
                state: record.state(),
                task_id: record.processor.as_ref().map(|p| p.task_id().clone()),
                quality: record.processor.as_ref().map(|p| p.task_quality()),
                pool_quality: record.pool_processor.as_ref().map(|p| p.task_quality()),
                deal_id: record.deal.id,
                supplier: record.deal.supplier,
                consumer: record.deal.consumer,
                benchmark_hashrate: record.deal.benchmark_hashrate,
            })
            .collect();
        deals.sort_by(|a, b| a.deal_id.cmp(&b.deal_id));
        deals
    }

    /// Penalty state of every supplier seen so far.
    pub fn suppliers(&self) -> Vec<SupplierStatus> {
        let now = Utc::now();
        let mut suppliers: Vec<SupplierStatus> = self
            .blacklist
            .snapshot()
            .into_iter()
            .map(|(address, window)| SupplierStatus {
                blacklisted: window.blacklisted_at(now),
                cooldown_until: window.cooldown_until(),
                current_step_secs: window.current_step().as_secs(),
                address,
            })
            .collect();
        suppliers.sort_by(|a, b| a.address.cmp(&b.address));
        suppliers
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            deals: self.deals.len(),
            suppliers: self.blacklist.len(),
            blacklisted_deals: self.blacklisted_deals.load(Ordering::Relaxed),
        }
    }

    pub fn deal_registry(&self) -> &DealRegistry {
        &self.deals
    }

    pub fn blacklist_registry(&self) -> &BlacklistRegistry {
        &self.blacklist
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DealStatus {
    pub deal_id: DealId,
    pub supplier: Address,
    pub consumer: Address,
    pub benchmark_hashrate: f64,
    pub state: DealState,
    pub task_id: Option<TaskId>,
    pub quality: Option<TaskQuality>,
    pub pool_quality: Option<TaskQuality>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplierStatus {
    pub address: Address,
    pub blacklisted: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub current_step_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorStats {
    pub deals: usize,
    pub suppliers: usize,
    pub blacklisted_deals: u64,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("deal not found: {0}")]
    DealNotFound(DealId),
    #[error(transparent)]
    Service(#[from] ServiceError),
}
