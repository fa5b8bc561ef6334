//! Cluster-wide agreement checks.
//!
//! Two nodes agree on the configuration when their `CLUSTER NODES` reports
//! list the same ids with the same owned slots. Open-slot markers are
//! ignored: only a node's own line carries them.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

use super::open_slots::{OpenSlotRepair, RepairOutcome};
use crate::client::cluster_ops::ClusterOps;
use crate::client::types::{NodeAddr, parse_cluster_nodes};
use crate::client::valkey_client::Commander;
use crate::config::TribConfig;
use crate::error::{Result, TribError};
use crate::slots::codec::{parse_slots, strip_open_slot_markers};
use crate::slots::distribution::{SlotRange, TOTAL_SLOTS, compact_ranges};
use crate::topology::ClusterSnapshot;

#[derive(Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
struct SignatureEntry {
    id: String,
    slots: String,
}

/// Hash of the ids and owned slots one node reports.
#[instrument(skip_all, fields(node = %node))]
pub async fn config_signature<C: Commander>(client: &C, node: &NodeAddr) -> Result<String> {
    let report = client.cluster_nodes(node).await?;
    let mut entries: Vec<SignatureEntry> = parse_cluster_nodes(&report)?
        .into_iter()
        .map(|line| SignatureEntry {
            slots: strip_open_slot_markers(&line.slots_string()),
            id: line.node_id,
        })
        .collect();
    entries.sort();

    let canonical = serde_json::to_vec(&entries)
        .map_err(|e| TribError::Consistency(format!("Failed to encode signature: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Check if every master reports the same configuration.
pub async fn is_config_consistent<C: Commander>(
    client: &C,
    snapshot: &ClusterSnapshot,
) -> Result<bool> {
    let mut signatures = BTreeSet::new();
    for addr in snapshot.master_addrs() {
        signatures.insert(config_signature(client, &addr).await?);
    }
    debug!(distinct = signatures.len(), "Compared config signatures");
    Ok(signatures.len() <= 1)
}

/// Slot coverage as seen by one master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    /// Number of distinct slots owned by some node.
    pub covered: usize,
    /// Slots claimed by more than one node.
    pub duplicates: Vec<u16>,
    /// Ranges no node claims.
    pub missing: Vec<SlotRange>,
}

impl CoverageReport {
    /// Build a report from every claimed slot, duplicates included.
    pub fn from_claims(claims: impl IntoIterator<Item = u16>) -> Self {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for slot in claims {
            if !seen.insert(slot) {
                duplicates.insert(slot);
            }
        }
        let missing = compact_ranges((0..TOTAL_SLOTS).filter(|s| !seen.contains(s)));
        Self {
            covered: seen.len(),
            duplicates: duplicates.into_iter().collect(),
            missing,
        }
    }

    /// Every slot is owned by exactly one node.
    pub fn is_complete(&self) -> bool {
        self.covered == usize::from(TOTAL_SLOTS) && self.duplicates.is_empty()
    }
}

/// Check that the first master's view covers every slot exactly once.
#[instrument(skip_all)]
pub async fn check_slots_coverage<C: Commander>(
    client: &C,
    snapshot: &ClusterSnapshot,
) -> Result<CoverageReport> {
    let Some(first) = snapshot.masters().next() else {
        return Err(TribError::Consistency("Cluster has no masters".to_string()));
    };
    let report = client.cluster_nodes(&first.addr).await?;

    let mut claims = Vec::new();
    for line in parse_cluster_nodes(&report)? {
        claims.extend(parse_slots(&line.slots_string())?.slots);
    }
    Ok(CoverageReport::from_claims(claims))
}

/// Sorted union of every slot a master reports as migrating or importing.
pub fn find_open_slots(snapshot: &ClusterSnapshot) -> Vec<u16> {
    let mut open = BTreeSet::new();
    for node in snapshot.masters() {
        if !node.migrating.is_empty() {
            warn!(node = %node.addr, slots = node.migrating.len(), "Node has slots in migrating state");
        }
        if !node.importing.is_empty() {
            warn!(node = %node.addr, slots = node.importing.len(), "Node has slots in importing state");
        }
        open.extend(node.migrating.keys().copied());
        open.extend(node.importing.keys().copied());
    }
    open.into_iter().collect()
}

/// Poll until every master reports the same configuration.
///
/// Waits forever unless `join_timeout` is configured.
#[instrument(skip_all)]
pub async fn wait_for_cluster_join<C: Commander>(
    client: &C,
    snapshot: &ClusterSnapshot,
    config: &TribConfig,
) -> Result<()> {
    info!("Waiting for the cluster to join");
    let started = Instant::now();
    let mut attempts = 0u64;

    while !is_config_consistent(client, snapshot).await? {
        attempts += 1;
        if let Some(limit) = config.join_timeout
            && started.elapsed() >= limit
        {
            return Err(TribError::Timeout {
                operation: "cluster join".to_string(),
                duration: limit,
            });
        }
        debug!(attempts, "Configuration not yet agreed");
        sleep(config.join_poll_interval).await;
    }

    info!(
        attempts,
        elapsed_ms = duration_ms(started.elapsed()),
        "All nodes agree about slots configuration"
    );
    Ok(())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of [`check_cluster`].
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Seed used for the check.
    pub seed: Option<NodeAddr>,
    pub consistent: bool,
    /// Open slots found before any repair.
    pub open_slots: Vec<u16>,
    /// One entry per repaired slot, when fixing.
    pub repairs: Vec<(u16, RepairOutcome)>,
    pub coverage: CoverageReport,
}

impl CheckReport {
    /// Agreement, full coverage and no slot left open.
    pub fn is_healthy(&self) -> bool {
        let open_settled = if self.repairs.is_empty() {
            self.open_slots.is_empty()
        } else {
            self.repairs.iter().all(|(_, outcome)| outcome.is_resolved())
        };
        self.consistent && open_settled && self.coverage.is_complete()
    }
}

/// Check configuration agreement, open slots and coverage.
///
/// With `fix`, every open slot goes through [`OpenSlotRepair`]. All sections
/// run even if an earlier one fails.
#[instrument(skip_all, fields(fix = fix))]
pub async fn check_cluster<C: Commander>(
    client: &C,
    config: &TribConfig,
    snapshot: &mut ClusterSnapshot,
    fix: bool,
) -> Result<CheckReport> {
    let seed = snapshot.nodes().first().map(|n| n.addr.clone());
    if let Some(seed) = &seed {
        info!(node = %seed, "Performing cluster check");
    }

    let consistent = is_config_consistent(client, snapshot).await?;
    if consistent {
        info!("All nodes agree about slots configuration");
    } else {
        error!("Nodes don't agree about configuration");
    }

    let open_slots = find_open_slots(snapshot);
    if !open_slots.is_empty() {
        warn!(slots = ?open_slots, "Open slots found");
    }

    let mut repairs = Vec::new();
    if fix {
        let repair = OpenSlotRepair::new(client, config);
        for slot in &open_slots {
            let outcome = repair.fix_open_slot(snapshot, *slot).await?;
            repairs.push((*slot, outcome));
        }
    }

    let coverage = check_slots_coverage(client, snapshot).await?;
    if coverage.is_complete() {
        info!(slots = TOTAL_SLOTS, "All slots covered");
    } else {
        error!(
            covered = coverage.covered,
            duplicates = coverage.duplicates.len(),
            "Not all slots are covered by nodes"
        );
    }

    Ok(CheckReport {
        seed,
        consistent,
        open_slots,
        repairs,
        coverage,
    })
}
