//! Exponentially weighted moving average with an explicit tick.

use parking_lot::Mutex;
use std::time::Duration;

/// Tick period the smoother is calibrated for.
pub const EWMA_TICK: Duration = Duration::from_secs(5);

/// A rate meter that decays older observations geometrically.
///
/// Writers accumulate counts with [`Ewma::update`]; every [`Ewma::tick`]
/// folds the accumulated count into the average as a per-second rate.
/// Readers call [`Ewma::rate`] at any time.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    tick_secs: f64,
    state: Mutex<EwmaState>,
}

#[derive(Debug, Default)]
struct EwmaState {
    uncounted: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    /// Create a smoother averaging over `window`, ticked every `tick`.
    pub fn new(tick: Duration, window: Duration) -> Self {
        let tick_secs = tick.as_secs_f64();
        let window_secs = window.as_secs_f64().max(tick_secs);
        Self {
            alpha: 1.0 - (-tick_secs / window_secs).exp(),
            tick_secs,
            state: Mutex::new(EwmaState::default()),
        }
    }

    /// Add `count` events to the current tick.
    pub fn update(&self, count: f64) {
        self.state.lock().uncounted += count;
    }

    /// Feed a per-second rate for the current tick.
    pub fn update_rate(&self, rate: f64) {
        self.update(rate * self.tick_secs);
    }

    /// Close the current tick and fold it into the average.
    pub fn tick(&self) {
        let mut state = self.state.lock();
        let instant = state.uncounted / self.tick_secs;
        state.uncounted = 0.0;

        if state.initialized {
            state.rate += self.alpha * (instant - state.rate);
        } else {
            state.rate = instant;
            state.initialized = true;
        }
    }

    /// Smoothed rate per second.
    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
