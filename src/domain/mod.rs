//! Domain types shared by the monitor, its registries and its adapters.
//!
//! This module provides:
//! - Identifier primitives: Address, DealId, TaskId
//! - The Deal under observation and the settlement BlacklistTarget

pub mod deal;
pub mod primitives;

pub use deal::Deal;
pub use primitives::{Address, BlacklistTarget, DealId, TaskId};
