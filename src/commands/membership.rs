//! `add-node` and `del-node`.

use std::fmt;

use tracing::{info, instrument};

use super::{Report, ping_all, require_cluster_enabled, require_empty};
use crate::client::cluster_ops::ClusterOps;
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::config::TribConfig;
use crate::error::{Result, TribError};
use crate::repair::consistency::{CheckReport, check_cluster, wait_for_cluster_join};
use crate::topology::{ClusterSnapshot, Node};

/// Outcome of [`add_node`].
#[derive(Debug, Clone)]
pub struct AddNodeReport {
    pub added: NodeAddr,
    pub existing: NodeAddr,
    /// Check of the cluster before the node was added.
    pub check: CheckReport,
    pub simulated: bool,
}

impl fmt::Display for AddNodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            ">>> Adding node {} to cluster {}",
            self.added, self.existing
        )?;
        write!(f, "{}", self.check)?;
        match (self.simulated, self.check.is_healthy()) {
            (true, _) => writeln!(f, "[OK] Simulation done, node {} not added.", self.added),
            (false, true) => writeln!(f, "[OK] New node added correctly."),
            (false, false) => writeln!(
                f,
                "[ERR] Node {} joined a cluster that failed its check.",
                self.added
            ),
        }
    }
}

impl Report for AddNodeReport {
    fn succeeded(&self) -> bool {
        self.check.is_healthy()
    }
}

/// Add the empty node `new` to the cluster `existing` belongs to.
#[instrument(skip_all, fields(new = %new, existing = %existing, simulate = simulate))]
pub async fn add_node<C: Commander>(
    client: &C,
    config: &TribConfig,
    new: &NodeAddr,
    existing: &NodeAddr,
    simulate: bool,
) -> Result<AddNodeReport> {
    info!("Adding node to cluster");
    let mut snapshot = ClusterSnapshot::load(client, existing).await?;
    let check = check_cluster(client, config, &mut snapshot, false).await?;

    ping_all(client, &[existing.clone(), new.clone()]).await?;
    require_cluster_enabled(client, new).await?;
    require_empty(client, new).await?;

    let mut node = Node::new(new.clone());
    node.is_master = true;
    snapshot.add_node(node)?;

    if !simulate {
        info!("Sending CLUSTER MEET to the new node");
        client.cluster_meet(new, existing).await?;
        wait_for_cluster_join(client, &snapshot, config).await?;
    }

    Ok(AddNodeReport {
        added: new.clone(),
        existing: existing.clone(),
        check,
        simulated: simulate,
    })
}

/// Outcome of [`del_node`].
#[derive(Debug, Clone)]
pub struct DelNodeReport {
    pub removed: NodeAddr,
    pub node_id: String,
    /// Nodes that were told to forget the removed one.
    pub forgotten_by: Vec<NodeAddr>,
}

impl fmt::Display for DelNodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ">>> Removing node {} ({})", self.node_id, self.removed)?;
        for node in &self.forgotten_by {
            writeln!(f, "[OK] {} forgot {}", node, self.node_id)?;
        }
        writeln!(f, "[OK] {} shut down.", self.removed)
    }
}

impl Report for DelNodeReport {}

/// Remove the slot-less node `node_id` from the cluster `seed` belongs to and
/// shut it down.
#[instrument(skip_all, fields(seed = %seed, node_id = %node_id))]
pub async fn del_node<C: Commander>(
    client: &C,
    seed: &NodeAddr,
    node_id: &str,
) -> Result<DelNodeReport> {
    let snapshot = ClusterSnapshot::load(client, seed).await?;
    let target = snapshot
        .get(node_id)
        .ok_or_else(|| TribError::NodeNotFound(node_id.to_string()))?;
    if target.slot_count() != 0 {
        return Err(TribError::Preflight(format!(
            "Node {} is not empty! Reshard data away and try again",
            node_id
        )));
    }
    let removed = target.addr.clone();

    info!("Sending CLUSTER FORGET messages to the cluster");
    let mut forgotten_by = Vec::new();
    for node in snapshot.nodes().iter().filter(|n| n.name != node_id) {
        client.cluster_forget(&node.addr, node_id).await?;
        forgotten_by.push(node.addr.clone());
    }

    info!(node = %removed, "Shutting down the node");
    client.shutdown(&removed).await?;

    Ok(DelNodeReport {
        removed,
        node_id: node_id.to_string(),
        forgotten_by,
    })
}
