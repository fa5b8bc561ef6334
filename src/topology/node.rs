//! One cluster member as seen by the tool.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::client::types::{ClusterNodesLine, NodeAddr, NodeId};
use crate::slots::codec::ParsedSlots;

/// A cluster member: identity, role, observed state and slot ownership.
///
/// `is_master` and `is_slave` are both taken from the reported flags and are
/// not forced to be exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Cluster-assigned id. Empty until the node has been seen in a report.
    pub name: NodeId,
    /// Client address.
    pub addr: NodeAddr,
    pub is_master: bool,
    pub is_slave: bool,
    /// The seed reported this line as itself.
    pub is_myself: bool,
    /// Configured `maxmemory`, used as the default capacity weight.
    pub maxmemory: u64,
    /// Number of keys, informational.
    pub dbsize: u64,
    /// Slots this node owns.
    pub slots: BTreeSet<u16>,
    /// Slots leaving this node, keyed by slot, valued by destination id.
    pub migrating: BTreeMap<u16, NodeId>,
    /// Slots arriving at this node, keyed by slot, valued by source id.
    pub importing: BTreeMap<u16, NodeId>,
    /// Capacity weight resolved for a rebalance.
    pub weight: u64,
    /// Desired slot count after a rebalance.
    pub target_slot_count: i64,
    /// `slots.len() - target_slot_count`; positive gives, negative receives.
    pub balance: i64,
}

impl Node {
    /// A node known only by address, e.g. from a command line argument.
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            name: NodeId::new(),
            addr,
            is_master: false,
            is_slave: false,
            is_myself: false,
            maxmemory: 0,
            dbsize: 0,
            slots: BTreeSet::new(),
            migrating: BTreeMap::new(),
            importing: BTreeMap::new(),
            weight: 0,
            target_slot_count: 0,
            balance: 0,
        }
    }

    /// Build a node reachable at `addr` from one `CLUSTER NODES` line. Slots
    /// are not applied; only a node's own `myself` line is authoritative for
    /// them.
    pub fn from_nodes_line(line: &ClusterNodesLine, addr: NodeAddr) -> Self {
        let mut node = Node::new(addr);
        node.name = line.node_id.clone();
        node.is_master = line.flags.master;
        node.is_slave = line.flags.slave;
        node.is_myself = line.flags.myself;
        node
    }

    /// Replace slot ownership and open-slot state with a parsed report.
    pub fn apply_slots(&mut self, parsed: ParsedSlots) {
        self.slots = parsed.slots.into_iter().collect();
        self.migrating = parsed.migrating;
        self.importing = parsed.importing;
    }

    /// Take ownership of a slot.
    pub fn add_slot(&mut self, slot: u16) {
        self.slots.insert(slot);
    }

    /// Give up ownership of a slot.
    pub fn delete_slot(&mut self, slot: u16) {
        self.slots.remove(&slot);
    }

    /// Check if this node owns a slot.
    pub fn owns(&self, slot: u16) -> bool {
        self.slots.contains(&slot)
    }

    /// Number of owned slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Check if any slot is migrating or importing here.
    pub fn has_open_slots(&self) -> bool {
        !self.migrating.is_empty() || !self.importing.is_empty()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
