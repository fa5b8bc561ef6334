//! An ordered view of every cluster member, rebuilt from a seed node.

use tracing::{debug, info, instrument, warn};

use super::node::Node;
use crate::client::cluster_ops::ClusterOps;
use crate::client::types::{NodeAddr, parse_cluster_nodes};
use crate::client::valkey_client::Commander;
use crate::error::{Result, TribError};
use crate::slots::codec::parse_slots;

/// The cluster as reported by one seed node, in report order.
///
/// At most one node per name. Engines mutate slot ownership in place while
/// they work; anything else is refreshed by loading a new snapshot.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    nodes: Vec<Node>,
}

impl ClusterSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from already known nodes.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut snapshot = Self::new();
        for node in nodes {
            snapshot.add_node(node)?;
        }
        Ok(snapshot)
    }

    /// Load the topology known to `seed`.
    ///
    /// Membership and roles come from the seed's `CLUSTER NODES`. Slot
    /// ownership and open-slot state come from each master's own `myself`
    /// line, since other nodes never report open slots.
    #[instrument(skip_all, fields(seed = %seed))]
    pub async fn load<C: Commander>(client: &C, seed: &NodeAddr) -> Result<Self> {
        let report = client.cluster_nodes(seed).await?;
        let mut snapshot = Self::new();

        for line in parse_cluster_nodes(&report)? {
            let addr = match (&line.addr, line.flags.myself) {
                (Some(addr), _) => addr.clone(),
                (None, true) => seed.clone(),
                (None, false) => {
                    warn!(node = %line.node_id, "Skipping node without a known address");
                    continue;
                }
            };
            let mut node = Node::from_nodes_line(&line, addr);
            node.dbsize = client.dbsize(&node.addr).await?;
            snapshot.add_node(node)?;
        }

        for node in snapshot.nodes.iter_mut().filter(|n| n.is_master) {
            let own_report = client.cluster_nodes(&node.addr).await?;
            let lines = parse_cluster_nodes(&own_report)?;
            if let Some(myself) = lines.iter().find(|l| l.flags.myself) {
                node.apply_slots(parse_slots(&myself.slots_string())?);
            }
            debug!(
                node = %node.addr,
                slots = node.slots.len(),
                migrating = node.migrating.len(),
                importing = node.importing.len(),
                "Loaded node slots"
            );
        }

        info!(
            nodes = snapshot.nodes.len(),
            masters = snapshot.masters().count(),
            "Loaded cluster topology"
        );
        Ok(snapshot)
    }

    /// Add a node. A second node with the same name, or with the same address
    /// when unnamed, is rejected.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        let duplicate = self.nodes.iter().any(|existing| {
            if node.name.is_empty() || existing.name.is_empty() {
                existing.name.is_empty() && node.name.is_empty() && existing.addr == node.addr
            } else {
                existing.name == node.name
            }
        });
        if duplicate {
            let label = if node.name.is_empty() {
                node.addr.to_string()
            } else {
                node.name.clone()
            };
            return Err(TribError::DuplicateNode(label));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// All nodes in report order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable access to all nodes.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Masters in report order.
    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_master)
    }

    /// Mutable access to masters in report order.
    pub fn masters_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut().filter(|n| n.is_master)
    }

    /// Addresses of every master.
    pub fn master_addrs(&self) -> Vec<NodeAddr> {
        self.masters().map(|n| n.addr.clone()).collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a node by exact name.
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Find a node by exact name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    /// Find the single node whose name starts with `prefix`, ignoring case.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<&Node> {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(TribError::NodeNotFound(prefix));
        }
        let mut matches = self
            .nodes
            .iter()
            .filter(|n| n.name.to_ascii_lowercase().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(node), None) => Ok(node),
            (Some(_), Some(_)) => Err(TribError::Preflight(format!(
                "Node id prefix {} is ambiguous",
                prefix
            ))),
            (None, _) => Err(TribError::NodeNotFound(prefix)),
        }
    }

    /// Move ownership of `slot` from `source` to `destination` in memory.
    pub fn transfer_slot(&mut self, slot: u16, source: &str, destination: &str) {
        if let Some(node) = self.get_mut(source) {
            node.delete_slot(slot);
        }
        if let Some(node) = self.get_mut(destination) {
            node.add_slot(slot);
        }
    }
}
