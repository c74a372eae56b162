//! Shared mutable state of the monitor: deals under watch and supplier
//! penalty windows.

pub mod blacklist;
pub mod deals;

pub use blacklist::{try_lift, BlacklistRegistry, PenaltyWindow, MAX_STEP, MIN_STEP};
pub use deals::{DealRecord, DealRegistry, DealState};
