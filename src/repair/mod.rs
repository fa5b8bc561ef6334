//! Detecting and repairing cluster inconsistencies.
//!
//! - [`consistency`]: config agreement, slot coverage and the `check` flow
//! - [`open_slots`]: per-slot repair of migrating/importing leftovers

pub mod consistency;
pub mod open_slots;

pub use consistency::{
    CheckReport, CoverageReport, check_cluster, check_slots_coverage, config_signature,
    find_open_slots, is_config_consistent, wait_for_cluster_join,
};
pub use open_slots::{OpenSlotRepair, RepairCase, RepairOutcome};
