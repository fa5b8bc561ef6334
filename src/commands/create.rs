//! `create`: build a cluster out of empty standalone masters.

use std::fmt;

use tracing::{info, instrument, warn};

use super::{Report, ping_all, require_cluster_enabled};
use crate::client::cluster_ops::ClusterOps;
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::config::TribConfig;
use crate::error::{Result, TribError};
use crate::repair::consistency::{CheckReport, check_cluster, wait_for_cluster_join};
use crate::slots::distribution::{SlotRange, allocate_slots};
use crate::topology::{ClusterSnapshot, Node};

/// Flags for [`create_cluster`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Only run the read-only steps and report the plan.
    pub simulate: bool,
    /// Flush nodes that already hold keys instead of refusing them.
    pub force_flush: bool,
}

/// Slots planned for one node.
#[derive(Debug, Clone)]
pub struct NodeAssignment {
    pub addr: NodeAddr,
    pub maxmemory: u64,
    pub range: Option<SlotRange>,
    /// Config epoch the node was given.
    pub epoch: u64,
}

/// Outcome of [`create_cluster`].
#[derive(Debug, Clone)]
pub struct CreateReport {
    pub assignments: Vec<NodeAssignment>,
    pub simulated: bool,
    /// Check of the new cluster; absent when simulating.
    pub check: Option<CheckReport>,
}

impl fmt::Display for CreateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for assignment in &self.assignments {
            let range = assignment
                .range
                .map_or_else(|| "no slots".to_string(), |r| r.to_string());
            writeln!(
                f,
                ">>> {} memory {} slots {}",
                assignment.addr, assignment.maxmemory, range
            )?;
        }
        match &self.check {
            Some(check) => write!(f, "{}", check),
            None if self.simulated => writeln!(f, "[OK] Simulation done, nothing changed."),
            None => Ok(()),
        }
    }
}

impl Report for CreateReport {
    fn succeeded(&self) -> bool {
        self.check.as_ref().is_none_or(CheckReport::is_healthy)
    }
}

/// Create a cluster from at least two empty, cluster-enabled nodes.
///
/// Slots are split by each node's `maxmemory`. Every node is checked for
/// keys before the first one is reset, so a refused node leaves all of them
/// untouched.
#[instrument(skip_all, fields(nodes = nodes.len(), simulate = options.simulate))]
pub async fn create_cluster<C: Commander>(
    client: &C,
    config: &TribConfig,
    nodes: &[NodeAddr],
    options: CreateOptions,
) -> Result<CreateReport> {
    if nodes.len() < 2 {
        return Err(TribError::Preflight(
            "You need at least 2 nodes".to_string(),
        ));
    }
    let mut snapshot = ClusterSnapshot::from_nodes(nodes.iter().map(|addr| {
        let mut node = Node::new(addr.clone());
        node.is_master = true;
        node
    }))?;

    ping_all(client, nodes).await?;
    for node in nodes {
        require_cluster_enabled(client, node).await?;
    }

    for node in snapshot.nodes_mut() {
        node.maxmemory = client.config_get_maxmemory(&node.addr).await?;
        info!(node = %node.addr, maxmemory = node.maxmemory, "Read node memory");
    }
    let weights: Vec<u64> = snapshot.nodes().iter().map(|n| n.maxmemory).collect();
    let allocations = allocate_slots(&weights)?;

    let mut to_flush = Vec::new();
    for node in nodes {
        if client.dbsize(node).await? == 0 {
            continue;
        }
        if options.force_flush && !options.simulate {
            to_flush.push(node.clone());
        } else {
            return Err(TribError::Preflight(format!(
                "Node {} already stores some keys",
                node
            )));
        }
    }

    let assignments: Vec<NodeAssignment> = snapshot
        .nodes()
        .iter()
        .zip(&allocations)
        .zip(1u64..)
        .map(|((node, allocation), epoch)| NodeAssignment {
            addr: node.addr.clone(),
            maxmemory: node.maxmemory,
            range: allocation.range,
            epoch,
        })
        .collect();

    if options.simulate {
        return Ok(CreateReport {
            assignments,
            simulated: true,
            check: None,
        });
    }

    for node in &to_flush {
        warn!(node = %node, "Flushing keys before reset");
        client.flushall(node).await?;
    }
    for node in nodes {
        client.cluster_reset_hard(node).await?;
    }
    info!("Nodes hard reset");

    for assignment in &assignments {
        client
            .cluster_set_config_epoch(&assignment.addr, assignment.epoch)
            .await?;
    }
    info!("Config epochs set");

    for (assignment, allocation) in assignments.iter().zip(&allocations) {
        if let Some(range) = assignment.range {
            info!(node = %assignment.addr, range = %range, "Allocating slots");
        }
        client
            .cluster_add_slots(&assignment.addr, &allocation.slots())
            .await?;
    }
    info!("Slots allocated to nodes");

    let (first, rest) = nodes.split_at(1);
    if let Some(first) = first.first() {
        info!(seed = %first, "Sending CLUSTER MEET messages to join the cluster");
        for node in rest {
            client.cluster_meet(node, first).await?;
        }
    }

    wait_for_cluster_join(client, &snapshot, config).await?;

    let seed = nodes.first().cloned().ok_or_else(|| {
        TribError::Preflight("You need at least 2 nodes".to_string())
    })?;
    snapshot = ClusterSnapshot::load(client, &seed).await?;
    let check = check_cluster(client, config, &mut snapshot, false).await?;

    Ok(CreateReport {
        assignments,
        simulated: false,
        check: Some(check),
    })
}
