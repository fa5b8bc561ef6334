//! `call`: run one command on every node.

use std::fmt;

use tracing::{info, instrument};

use super::Report;
use crate::client::cluster_ops::ClusterOps;
use crate::client::resp::{Command, Reply};
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::error::{Result, TribError};
use crate::topology::ClusterSnapshot;

/// Replies collected by [`call_cluster`], in node order.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub command: Command,
    pub replies: Vec<(NodeAddr, Reply)>,
}

impl fmt::Display for CallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ">>> Calling {}", self.command)?;
        for (node, reply) in &self.replies {
            writeln!(f, "{}: {}", node, reply)?;
        }
        Ok(())
    }
}

impl Report for CallReport {}

/// Send `args` to every node of the cluster `seed` belongs to.
///
/// Error replies are collected like any other reply.
#[instrument(skip_all, fields(seed = %seed))]
pub async fn call_cluster<C: Commander>(
    client: &C,
    seed: &NodeAddr,
    args: &[String],
) -> Result<CallReport> {
    if args.is_empty() {
        return Err(TribError::Preflight("No command given".to_string()));
    }
    let command = Command::from_args(args);
    let snapshot = ClusterSnapshot::load(client, seed).await?;

    info!(command = %command, nodes = snapshot.len(), "Calling command on every node");
    let mut replies = Vec::with_capacity(snapshot.len());
    for node in snapshot.nodes() {
        let reply = client.call(&node.addr, &command).await?;
        replies.push((node.addr.clone(), reply));
    }

    Ok(CallReport { command, replies })
}
