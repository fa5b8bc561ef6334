//! Entry points for the subcommands.
//!
//! Each entry point loads what it needs through a [`Commander`], performs its
//! preflight checks before touching the cluster and returns a report. The
//! binary prints the report and derives the exit code from
//! [`Report::succeeded`].

use std::fmt;

use tracing::{info, instrument};

use crate::client::cluster_ops::ClusterOps;
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::error::{Result, TribError};

pub mod call;
pub mod check;
pub mod create;
pub mod info;
pub mod membership;
pub mod rebalance;

pub use call::{CallReport, call_cluster};
pub use check::check_cluster_cmd;
pub use create::{CreateOptions, CreateReport, create_cluster};
pub use info::{ClusterInfoReport, show_cluster_info};
pub use membership::{AddNodeReport, DelNodeReport, add_node, del_node};
pub use rebalance::{RebalanceCommandOptions, RebalanceReport, rebalance_cluster};

/// Printable outcome of a subcommand.
pub trait Report: fmt::Display {
    /// Whether the run should exit with status 0.
    fn succeeded(&self) -> bool {
        true
    }
}

/// Fail unless every node answers `PONG`.
#[instrument(skip_all, fields(nodes = nodes.len()))]
pub async fn ping_all<C: Commander>(client: &C, nodes: &[NodeAddr]) -> Result<()> {
    for node in nodes {
        if !client.ping(node).await? {
            return Err(TribError::Preflight(format!(
                "{} was offline or firewalled?",
                node
            )));
        }
    }
    info!("All nodes are online");
    Ok(())
}

/// Fail unless the node runs with `cluster-enabled yes`.
pub async fn require_cluster_enabled<C: Commander>(client: &C, node: &NodeAddr) -> Result<()> {
    if client.info_cluster(node).await?.cluster_enabled {
        Ok(())
    } else {
        Err(TribError::Preflight(format!(
            "Node {} is not configured as a cluster node",
            node
        )))
    }
}

/// Fail unless the node holds no keys and knows no other node.
pub async fn require_empty<C: Commander>(client: &C, node: &NodeAddr) -> Result<()> {
    let known_nodes = client.cluster_info(node).await?.known_nodes;
    let dbsize = client.dbsize(node).await?;
    if dbsize > 0 || known_nodes != Some(1) {
        return Err(TribError::Preflight(format!(
            "Node {} is not empty. Either the node already knows other nodes \
             (check with CLUSTER NODES) or contains some key in database 0",
            node
        )));
    }
    Ok(())
}
