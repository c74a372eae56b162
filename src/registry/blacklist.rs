//! Per-supplier penalty windows with exponential backoff.

use crate::domain::Address;
use crate::services::{BlacklistService, ServiceError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MIN_STEP: Duration = Duration::from_secs(60 * 60);
pub const MAX_STEP: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cooldown state of one supplier.
///
/// Every failure blacklists the supplier for the current step and doubles
/// the step; sustained good behaviour earns the step back. The step always
/// stays within `[MIN_STEP, MAX_STEP]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyWindow {
    cooldown_until: Option<DateTime<Utc>>,
    current_step: Duration,
    last_success: Option<DateTime<Utc>>,
}

impl Default for PenaltyWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl PenaltyWindow {
    pub fn new() -> Self {
        Self {
            cooldown_until: None,
            current_step: MIN_STEP,
            last_success: None,
        }
    }

    pub fn current_step(&self) -> Duration {
        self.current_step
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn failure(&mut self) {
        self.failure_at(Utc::now())
    }

    pub fn failure_at(&mut self, now: DateTime<Utc>) {
        self.cooldown_until = Some(now + to_chrono(self.current_step));
        self.last_success = None;
        self.current_step = (self.current_step * 2).min(MAX_STEP);
    }

    pub fn success(&mut self) {
        self.success_at(Utc::now())
    }

    /// Credit the time worked well since the previous success against the
    /// step. The first success after a failure only starts the clock.
    pub fn success_at(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_success {
            let worked = (now - last).to_std().unwrap_or_default();
            self.current_step = self.current_step.saturating_sub(worked).max(MIN_STEP);
        }
        self.last_success = Some(now);
    }

    pub fn blacklisted(&self) -> bool {
        self.blacklisted_at(Utc::now())
    }

    pub fn blacklisted_at(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// True once a cooldown has expired but the market still lists the
    /// supplier.
    pub fn lift_due_at(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now >= until)
    }
}

fn to_chrono(step: Duration) -> chrono::Duration {
    chrono::Duration::seconds(step.as_secs() as i64)
}

/// Remove `address` from the market blacklist if its cooldown expired.
///
/// Returns whether the supplier was lifted. Failures leave the window
/// untouched so the next call retries.
pub async fn try_lift(
    address: &Address,
    window: &Mutex<PenaltyWindow>,
    service: &dyn BlacklistService,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let expired = {
        let window = window.lock();
        if !window.lift_due_at(now) {
            return Ok(false);
        }
        window.cooldown_until
    };

    info!(supplier = %address, "removing from blacklist on market");
    if let Err(e) = service.remove(address).await {
        warn!(supplier = %address, error = %e, "cannot remove address from blacklist");
        return Err(e);
    }

    let mut window = window.lock();
    // A failure recorded while the call was in flight starts a new cooldown.
    if window.cooldown_until == expired {
        window.cooldown_until = None;
    }
    Ok(true)
}

/// Concurrency-safe map of supplier address to penalty window.
///
/// Windows are created on first sighting and never removed.
#[derive(Debug, Default)]
pub struct BlacklistRegistry {
    windows: RwLock<HashMap<Address, Arc<Mutex<PenaltyWindow>>>>,
}

impl BlacklistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<Arc<Mutex<PenaltyWindow>>> {
        self.windows.read().get(address).cloned()
    }

    /// Window for `address`, created if the supplier was never seen before.
    pub fn get_or_create(&self, address: &Address) -> Arc<Mutex<PenaltyWindow>> {
        if let Some(window) = self.get(address) {
            return window;
        }

        self.windows
            .write()
            .entry(address.clone())
            .or_insert_with(|| {
                debug!(supplier = %address, "tracking new supplier");
                Arc::new(Mutex::new(PenaltyWindow::new()))
            })
            .clone()
    }

    pub fn entries(&self) -> Vec<(Address, Arc<Mutex<PenaltyWindow>>)> {
        self.windows
            .read()
            .iter()
            .map(|(address, window)| (address.clone(), window.clone()))
            .collect()
    }

    /// Copy of every window's current state.
    pub fn snapshot(&self) -> Vec<(Address, PenaltyWindow)> {
        self.entries()
            .into_iter()
            .map(|(address, window)| {
                let state = window.lock().clone();
                (address, state)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.windows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.read().is_empty()
    }
}
