//! `check` and `fix`: verify agreement, open slots and coverage.

use std::fmt;

use tracing::instrument;

use super::Report;
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::config::TribConfig;
use crate::error::Result;
use crate::repair::consistency::{CheckReport, check_cluster};
use crate::slots::distribution::{TOTAL_SLOTS, format_ranges};
use crate::topology::ClusterSnapshot;

/// Load the cluster known to `seed` and check it, repairing open slots when
/// `fix` is set.
#[instrument(skip_all, fields(seed = %seed, fix = fix))]
pub async fn check_cluster_cmd<C: Commander>(
    client: &C,
    config: &TribConfig,
    seed: &NodeAddr,
    fix: bool,
) -> Result<CheckReport> {
    let mut snapshot = ClusterSnapshot::load(client, seed).await?;
    let mut report = check_cluster(client, config, &mut snapshot, fix).await?;
    report.seed = Some(seed.clone());
    Ok(report)
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(seed) = &self.seed {
            writeln!(f, ">>> Performing Cluster Check (using node {})", seed)?;
        }

        if self.consistent {
            writeln!(f, "[OK] All nodes agree about slots configuration.")?;
        } else {
            writeln!(f, "[ERR] Nodes don't agree about configuration!")?;
        }

        writeln!(f, ">>> Check for open slots...")?;
        if !self.open_slots.is_empty() {
            let slots: Vec<String> = self.open_slots.iter().map(u16::to_string).collect();
            writeln!(f, "[WARNING] The following slots are open: {}", slots.join(","))?;
        }
        for (slot, outcome) in &self.repairs {
            if outcome.is_resolved() {
                writeln!(f, "[OK] Slot {} {}", slot, outcome)?;
            } else {
                writeln!(f, "[ERR] Can't fix {}", outcome)?;
            }
        }

        writeln!(f, ">>> Check slots coverage...")?;
        if self.coverage.is_complete() {
            writeln!(f, "[OK] All {} slots covered.", TOTAL_SLOTS)?;
        } else {
            writeln!(f, "[ERR] Not all {} slots are covered by nodes.", TOTAL_SLOTS)?;
            if !self.coverage.missing.is_empty() {
                writeln!(f, "Missing slots: {}", format_ranges(&self.coverage.missing))?;
            }
            if !self.coverage.duplicates.is_empty() {
                let dups: Vec<String> = self.coverage.duplicates.iter().map(u16::to_string).collect();
                writeln!(f, "Slots claimed twice: {}", dups.join(","))?;
            }
        }
        Ok(())
    }
}

impl Report for CheckReport {
    fn succeeded(&self) -> bool {
        self.is_healthy()
    }
}
