//! `info`: one line per node with keys, slots and open slots.

use std::fmt;

use tracing::instrument;

use super::Report;
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::error::Result;
use crate::slots::distribution::TOTAL_SLOTS;
use crate::topology::{ClusterSnapshot, Node};

/// Snapshot summary printed by `info`.
#[derive(Debug, Clone)]
pub struct ClusterInfoReport {
    pub nodes: Vec<Node>,
}

impl ClusterInfoReport {
    pub fn total_keys(&self) -> u64 {
        self.nodes.iter().map(|n| n.dbsize).sum()
    }

    pub fn total_slots(&self) -> usize {
        self.nodes.iter().map(Node::slot_count).sum()
    }
}

fn open_slots<'a>(slots: impl ExactSizeIterator<Item = &'a u16>) -> String {
    let count = slots.len();
    let list: Vec<String> = slots.map(u16::to_string).collect();
    format!("{}({})", count, list.join(","))
}

impl fmt::Display for ClusterInfoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            writeln!(
                f,
                "{:<22} | {} | {:>11} | {:>11} | migrating {} | importing {}",
                node.addr.to_string(),
                node.name,
                format!("{} keys", node.dbsize),
                format!("{} slots", node.slot_count()),
                open_slots(node.migrating.keys()),
                open_slots(node.importing.keys()),
            )?;
        }
        writeln!(f, "{} keys", self.total_keys())?;
        if self.total_slots() == usize::from(TOTAL_SLOTS) {
            writeln!(f, "[OK] All {} slots covered.", TOTAL_SLOTS)
        } else {
            writeln!(f, "[ERR] Seems that all {} slots are not covered.", TOTAL_SLOTS)
        }
    }
}

impl Report for ClusterInfoReport {}

/// Load the cluster known to `seed` and summarize it.
#[instrument(skip_all, fields(seed = %seed))]
pub async fn show_cluster_info<C: Commander>(
    client: &C,
    seed: &NodeAddr,
) -> Result<ClusterInfoReport> {
    let snapshot = ClusterSnapshot::load(client, seed).await?;
    Ok(ClusterInfoReport {
        nodes: snapshot.nodes().to_vec(),
    })
}
