//! Slot management for Valkey clusters.
//!
//! The pure parts (slot strings, allocation, rebalance planning) are kept
//! apart from the migration engine that talks to nodes.
//!
//! ## Module Structure
//!
//! - [`codec`]: slot-string parsing for `CLUSTER NODES` output
//! - [`distribution`]: slot ranges and weighted allocation for new clusters
//! - [`planner`]: rebalance planning with `RebalancePlan` and `SlotsMovement`
//! - [`migration`]: live slot migration protocol

pub mod codec;
pub mod distribution;
pub mod migration;
pub mod planner;

pub use codec::{ParsedSlots, parse_slots, strip_open_slot_markers};
pub use distribution::{
    SlotAllocation, SlotRange, TOTAL_SLOTS, allocate_slots, compact_ranges, format_ranges,
};
pub use migration::{MigrationEngine, MoveOptions, SlotMove};
pub use planner::{NodeBalance, RebalanceOptions, RebalancePlan, SlotsMovement, plan_rebalance};
