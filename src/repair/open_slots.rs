//! Repair of slots left in migrating or importing state.
//!
//! For one slot the masters are classified into owners, migrating nodes and
//! importing nodes. Nodes that claim nothing but still hold keys for the slot
//! count as importing. The classification is then reduced to one of a few
//! known shapes, each with a fixed repair:
//!
//! | shape | repair |
//! |---|---|
//! | no owner | assign the slot to the master with most keys |
//! | several owners | keep the one with most keys, the others import from it |
//! | 1 migrating, 1 importing | resume the live move |
//! | 0 migrating, n importing | cold move the keys to the owner |
//! | 1 migrating without keys, 0 importing | close the slot |
//! | 1 migrating, n > 1 importing | cold move the keys to the migrating node |
//!
//! Anything else is reported as unresolved and left for an operator.

use std::fmt;

use tracing::{error, info, instrument, warn};

use crate::client::cluster_ops::{ClusterOps, SetSlot};
use crate::client::types::{NodeAddr, NodeId};
use crate::client::valkey_client::Commander;
use crate::config::TribConfig;
use crate::error::{Result, TribError};
use crate::slots::migration::{MigrationEngine, MoveOptions};
use crate::topology::ClusterSnapshot;

/// The repair that settled a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairCase {
    /// Nobody owned the slot; an owner was assigned and nothing else was open.
    OwnerAssigned,
    /// One migrating and one importing node: the live move was resumed.
    ResumedMove,
    /// Only importing nodes: their keys were moved to the owner.
    MovedToOwner,
    /// One migrating node without keys: the slot was closed in place.
    ClosedMigration,
    /// One migrating and several importing nodes: keys were moved to the
    /// migrating node.
    MovedToMigrating,
    /// No node reported the slot open any more.
    AlreadyStable,
}

impl fmt::Display for RepairCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RepairCase::OwnerAssigned => "owner assigned",
            RepairCase::ResumedMove => "resumed live move",
            RepairCase::MovedToOwner => "moved importing keys to owner",
            RepairCase::ClosedMigration => "closed empty migration",
            RepairCase::MovedToMigrating => "moved importing keys to migrating node",
            RepairCase::AlreadyStable => "already stable",
        };
        f.write_str(text)
    }
}

/// Result of repairing one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The slot is stable again.
    Resolved(RepairCase),
    /// The shape is not one the tool knows how to repair.
    Unresolved {
        slot: u16,
        owner: Option<NodeAddr>,
        migrating: Vec<NodeAddr>,
        importing: Vec<NodeAddr>,
    },
}

impl RepairOutcome {
    /// Check if the slot was repaired.
    pub fn is_resolved(&self) -> bool {
        matches!(self, RepairOutcome::Resolved(_))
    }
}

impl fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairOutcome::Resolved(case) => write!(f, "resolved ({})", case),
            RepairOutcome::Unresolved {
                slot,
                owner,
                migrating,
                importing,
            } => {
                let owner = owner
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string);
                write!(
                    f,
                    "slot {} is migrating in [{}], importing in [{}], owner is {}",
                    slot,
                    join_addrs(migrating),
                    join_addrs(importing),
                    owner
                )
            }
        }
    }
}

fn join_addrs(addrs: &[NodeAddr]) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Node ids in first-seen order, without duplicates.
#[derive(Debug, Default)]
struct Claimants(Vec<NodeId>);

impl Claimants {
    fn insert(&mut self, name: &str) {
        if !self.0.iter().any(|n| n == name) {
            self.0.push(name.to_string());
        }
    }

    fn remove(&mut self, name: &str) {
        self.0.retain(|n| n != name);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn first(&self) -> Option<&NodeId> {
        self.0.first()
    }

    fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }
}

/// Drives open slots back to a stable state.
pub struct OpenSlotRepair<'a, C> {
    client: &'a C,
    config: &'a TribConfig,
}

impl<'a, C: Commander> OpenSlotRepair<'a, C> {
    pub fn new(client: &'a C, config: &'a TribConfig) -> Self {
        Self { client, config }
    }

    /// Repair one open slot.
    ///
    /// Command failures abort with an error. A shape that cannot be repaired
    /// is returned as [`RepairOutcome::Unresolved`] so other slots can still
    /// be processed.
    #[instrument(skip(self, snapshot))]
    pub async fn fix_open_slot(
        &self,
        snapshot: &mut ClusterSnapshot,
        slot: u16,
    ) -> Result<RepairOutcome> {
        info!(slot, "Fixing open slot");

        let owners: Vec<NodeId> = snapshot
            .masters()
            .filter(|n| n.owns(slot))
            .map(|n| n.name.clone())
            .collect();
        let mut owner = owners.first().cloned();

        let mut migrating = Claimants::default();
        let mut importing = Claimants::default();
        for node in snapshot.masters() {
            if node.migrating.contains_key(&slot) {
                migrating.insert(&node.name);
            } else if node.importing.contains_key(&slot) {
                importing.insert(&node.name);
            } else if owner.as_deref() != Some(node.name.as_str())
                && self
                    .client
                    .cluster_count_keys_in_slot(&node.addr, slot)
                    .await?
                    > 0
            {
                warn!(slot, node = %node.addr, "Found keys for slot in a node that does not claim it");
                importing.insert(&node.name);
            }
        }

        let mut assigned = false;
        if owner.is_none() {
            info!(slot, "Nobody claims ownership, selecting an owner");
            let candidates: Vec<NodeId> = snapshot.masters().map(|n| n.name.clone()).collect();
            let Some(selected) = self.most_keys(snapshot, &candidates, slot).await? else {
                return Err(TribError::Consistency(format!(
                    "Can't select an owner for slot {}",
                    slot
                )));
            };
            let addr = addr_of(snapshot, &selected)?;
            info!(slot, node = %addr, "Configuring slot owner");

            self.client
                .cluster_setslot(&addr, slot, SetSlot::Stable)
                .await?;
            self.client.cluster_add_slots(&addr, &[slot]).await?;
            self.client.cluster_bump_epoch(&addr).await?;
            if let Some(node) = snapshot.get_mut(&selected) {
                node.add_slot(slot);
                node.migrating.remove(&slot);
                node.importing.remove(&slot);
            }

            migrating.remove(&selected);
            importing.remove(&selected);
            owner = Some(selected);
            assigned = true;
        }

        if owners.len() > 1 {
            info!(slot, owners = owners.len(), "Slot has multiple owners");
            let Some(keeper) = self.most_keys(snapshot, &owners, slot).await? else {
                return Err(TribError::Consistency(format!(
                    "Can't select an owner for slot {}",
                    slot
                )));
            };
            let keeper_addr = addr_of(snapshot, &keeper)?;

            for loser in owners.iter().filter(|n| **n != keeper) {
                let addr = addr_of(snapshot, loser)?;
                self.client.cluster_del_slots(&addr, &[slot]).await?;
                self.client
                    .cluster_setslot(&addr, slot, SetSlot::Importing(keeper.clone()))
                    .await?;
                if let Some(node) = snapshot.get_mut(loser) {
                    node.delete_slot(slot);
                    node.migrating.remove(&slot);
                    node.importing.insert(slot, keeper.clone());
                }
                migrating.remove(loser);
                importing.insert(loser);
                self.client.cluster_bump_epoch(&keeper_addr).await?;
            }
            importing.remove(&keeper);
            owner = Some(keeper);
        }

        info!(
            slot,
            migrating = %self.describe(snapshot, &migrating),
            importing = %self.describe(snapshot, &importing),
            "Classified open slot"
        );

        let engine = MigrationEngine::new(self.client, self.config);

        match (migrating.len(), importing.len()) {
            (1, 1) => {
                let (Some(source), Some(destination)) =
                    (migrating.first().cloned(), importing.first().cloned())
                else {
                    return Err(TribError::Consistency(format!(
                        "Open slot {} lost its claimants",
                        slot
                    )));
                };
                let options = MoveOptions {
                    update: true,
                    ..MoveOptions::default()
                };
                engine
                    .move_slot(snapshot, &source, &destination, slot, options)
                    .await?;
                clear_open_state(snapshot, slot, [source.as_str(), destination.as_str()]);
                Ok(RepairOutcome::Resolved(RepairCase::ResumedMove))
            }
            (0, n) if n > 0 => {
                let Some(owner) = owner else {
                    return Ok(self.unresolved(snapshot, slot, None, &migrating, &importing));
                };
                info!(slot, owner = %addr_of(snapshot, &owner)?, "Moving all slot keys to its owner");
                for node in importing.iter().filter(|n| **n != owner) {
                    engine
                        .move_slot(snapshot, node, &owner, slot, MoveOptions::cold())
                        .await?;
                    self.set_stable(snapshot, node, slot).await?;
                }
                Ok(RepairOutcome::Resolved(RepairCase::MovedToOwner))
            }
            (1, 0) => {
                let Some(node) = migrating.first().cloned() else {
                    return Ok(self.unresolved(snapshot, slot, owner, &migrating, &importing));
                };
                let addr = addr_of(snapshot, &node)?;
                if self.client.cluster_count_keys_in_slot(&addr, slot).await? != 0 {
                    return Ok(self.unresolved(snapshot, slot, owner, &migrating, &importing));
                }
                self.set_stable(snapshot, &node, slot).await?;
                Ok(RepairOutcome::Resolved(RepairCase::ClosedMigration))
            }
            (1, n) if n > 1 => {
                let Some(receiver) = migrating.first().cloned() else {
                    return Ok(self.unresolved(snapshot, slot, owner, &migrating, &importing));
                };
                info!(slot, owner = %addr_of(snapshot, &receiver)?, "Moving all slot keys to the migrating node");
                for node in importing.iter() {
                    engine
                        .move_slot(snapshot, node, &receiver, slot, MoveOptions::cold())
                        .await?;
                    self.set_stable(snapshot, node, slot).await?;
                }
                self.set_stable(snapshot, &receiver, slot).await?;
                Ok(RepairOutcome::Resolved(RepairCase::MovedToMigrating))
            }
            (0, 0) if assigned => Ok(RepairOutcome::Resolved(RepairCase::OwnerAssigned)),
            (0, 0) => Ok(RepairOutcome::Resolved(RepairCase::AlreadyStable)),
            _ => Ok(self.unresolved(snapshot, slot, owner, &migrating, &importing)),
        }
    }

    /// The candidate holding most keys in `slot`; the first one wins ties.
    async fn most_keys(
        &self,
        snapshot: &ClusterSnapshot,
        candidates: &[NodeId],
        slot: u16,
    ) -> Result<Option<NodeId>> {
        let mut best: Option<(NodeId, u64)> = None;
        for name in candidates {
            let addr = addr_of(snapshot, name)?;
            let keys = self.client.cluster_count_keys_in_slot(&addr, slot).await?;
            if best.as_ref().is_none_or(|(_, most)| keys > *most) {
                best = Some((name.clone(), keys));
            }
        }
        Ok(best.map(|(name, _)| name))
    }

    async fn set_stable(
        &self,
        snapshot: &mut ClusterSnapshot,
        name: &str,
        slot: u16,
    ) -> Result<()> {
        let addr = addr_of(snapshot, name)?;
        info!(slot, node = %addr, "Setting slot as stable");
        self.client
            .cluster_setslot(&addr, slot, SetSlot::Stable)
            .await?;
        clear_open_state(snapshot, slot, [name]);
        Ok(())
    }

    fn describe(&self, snapshot: &ClusterSnapshot, claimants: &Claimants) -> String {
        join_addrs(&addrs_of(snapshot, claimants))
    }

    fn unresolved(
        &self,
        snapshot: &ClusterSnapshot,
        slot: u16,
        owner: Option<NodeId>,
        migrating: &Claimants,
        importing: &Claimants,
    ) -> RepairOutcome {
        let outcome = RepairOutcome::Unresolved {
            slot,
            owner: owner.and_then(|name| snapshot.get(&name).map(|n| n.addr.clone())),
            migrating: addrs_of(snapshot, migrating),
            importing: addrs_of(snapshot, importing),
        };
        error!(slot, details = %outcome, "Can't fix this slot automatically");
        outcome
    }
}

fn addr_of(snapshot: &ClusterSnapshot, name: &str) -> Result<NodeAddr> {
    snapshot
        .get(name)
        .map(|n| n.addr.clone())
        .ok_or_else(|| TribError::NodeNotFound(name.to_string()))
}

fn addrs_of(snapshot: &ClusterSnapshot, claimants: &Claimants) -> Vec<NodeAddr> {
    claimants
        .iter()
        .filter_map(|name| snapshot.get(name).map(|n| n.addr.clone()))
        .collect()
}

fn clear_open_state<'n>(
    snapshot: &mut ClusterSnapshot,
    slot: u16,
    names: impl IntoIterator<Item = &'n str>,
) {
    for name in names {
        if let Some(node) = snapshot.get_mut(name) {
            node.migrating.remove(&slot);
            node.importing.remove(&slot);
        }
    }
}
