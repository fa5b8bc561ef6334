//! Typed cluster administration commands.
//!
//! [`ClusterOps`] is implemented for every [`Commander`] and turns the raw
//! command/reply exchange into typed results. Control commands that must
//! answer `+OK` fail with [`TribError::CommandFailed`] otherwise.

use std::future::Future;

use bytes::Bytes;
use tracing::{debug, instrument};

use super::parsing::ClusterInfoFields;
use super::resp::{Command, Reply};
use super::types::{NodeAddr, NodeId};
use super::valkey_client::Commander;
use crate::error::{Result, TribError};

/// Target state for `CLUSTER SETSLOT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetSlot {
    /// The slot is arriving from the given node.
    Importing(NodeId),
    /// The slot is leaving for the given node.
    Migrating(NodeId),
    /// The slot is owned by the given node.
    Node(NodeId),
    /// Clear any importing/migrating state.
    Stable,
}

/// Outcome of a `MIGRATE` call that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrateStatus {
    /// The key was transferred.
    Ok,
    /// The key no longer existed on the source.
    NoKey,
}

/// Build a `CLUSTER SETSLOT` command.
pub fn setslot_command(slot: u16, state: &SetSlot) -> Command {
    let cmd = Command::new("CLUSTER").arg("SETSLOT").arg(slot);
    match state {
        SetSlot::Importing(id) => cmd.arg("IMPORTING").arg(id),
        SetSlot::Migrating(id) => cmd.arg("MIGRATING").arg(id),
        SetSlot::Node(id) => cmd.arg("NODE").arg(id),
        SetSlot::Stable => cmd.arg("STABLE"),
    }
}

/// Turn any reply other than `+OK` into [`TribError::CommandFailed`].
pub fn expect_ok(node: &NodeAddr, cmd: &Command, reply: Reply) -> Result<()> {
    if reply.is_ok() {
        return Ok(());
    }
    Err(refused(node, cmd, &reply))
}

fn refused(node: &NodeAddr, cmd: &Command, reply: &Reply) -> TribError {
    TribError::CommandFailed {
        node: node.clone(),
        command: cmd.to_string(),
        reply: reply
            .as_error()
            .map(str::to_string)
            .unwrap_or_else(|| reply.to_string()),
    }
}

fn unexpected(node: &NodeAddr, cmd: &Command, reply: &Reply) -> TribError {
    TribError::UnexpectedReply {
        node: node.clone(),
        command: cmd.to_string(),
        reply: format!("{:?}", reply),
    }
}

/// Extension trait with the administrative command vocabulary.
pub trait ClusterOps {
    /// Run an arbitrary command and hand back the reply, error replies included.
    fn call(&self, node: &NodeAddr, cmd: &Command)
    -> impl Future<Output = Result<Reply>> + Send;

    /// `PING`; true when the node answered `PONG`.
    fn ping(&self, node: &NodeAddr) -> impl Future<Output = Result<bool>> + Send;

    /// `DBSIZE`.
    fn dbsize(&self, node: &NodeAddr) -> impl Future<Output = Result<u64>> + Send;

    /// `FLUSHALL`.
    fn flushall(&self, node: &NodeAddr) -> impl Future<Output = Result<()>> + Send;

    /// `CONFIG GET maxmemory`.
    fn config_get_maxmemory(&self, node: &NodeAddr) -> impl Future<Output = Result<u64>> + Send;

    /// `INFO` with an optional section, as raw text.
    fn info(
        &self,
        node: &NodeAddr,
        section: Option<&str>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// `INFO CLUSTER`, parsed.
    fn info_cluster(
        &self,
        node: &NodeAddr,
    ) -> impl Future<Output = Result<ClusterInfoFields>> + Send;

    /// `CLUSTER INFO`, parsed.
    fn cluster_info(
        &self,
        node: &NodeAddr,
    ) -> impl Future<Output = Result<ClusterInfoFields>> + Send;

    /// `CLUSTER NODES` as raw text.
    fn cluster_nodes(&self, node: &NodeAddr) -> impl Future<Output = Result<String>> + Send;

    /// `CLUSTER RESET HARD`.
    fn cluster_reset_hard(&self, node: &NodeAddr) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER SET-CONFIG-EPOCH <epoch>`.
    fn cluster_set_config_epoch(
        &self,
        node: &NodeAddr,
        epoch: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER ADDSLOTS <slot...>`.
    fn cluster_add_slots(
        &self,
        node: &NodeAddr,
        slots: &[u16],
    ) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER DELSLOTS <slot>`.
    fn cluster_del_slots(
        &self,
        node: &NodeAddr,
        slots: &[u16],
    ) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER MEET <host> <port>`.
    fn cluster_meet(
        &self,
        node: &NodeAddr,
        peer: &NodeAddr,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER FORGET <id>`.
    fn cluster_forget(
        &self,
        node: &NodeAddr,
        node_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER SETSLOT <slot> ...`.
    fn cluster_setslot(
        &self,
        node: &NodeAddr,
        slot: u16,
        state: SetSlot,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER BUMPEPOCH`. The reply is `BUMPED <n>` or `STILL <n>`.
    fn cluster_bump_epoch(&self, node: &NodeAddr) -> impl Future<Output = Result<()>> + Send;

    /// `CLUSTER COUNTKEYSINSLOT <slot>`.
    fn cluster_count_keys_in_slot(
        &self,
        node: &NodeAddr,
        slot: u16,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// `CLUSTER GETKEYSINSLOT <slot> <count>`.
    fn cluster_get_keys_in_slot(
        &self,
        node: &NodeAddr,
        slot: u16,
        count: u64,
    ) -> impl Future<Output = Result<Vec<Bytes>>> + Send;

    /// `MIGRATE <host> <port> <key> <db> <timeout>`, issued on `node`.
    fn migrate(
        &self,
        node: &NodeAddr,
        target: &NodeAddr,
        key: &Bytes,
        db: u32,
        timeout_ms: u64,
    ) -> impl Future<Output = Result<MigrateStatus>> + Send;

    /// `SHUTDOWN`. The node closing the connection counts as success.
    fn shutdown(&self, node: &NodeAddr) -> impl Future<Output = Result<()>> + Send;
}

impl<C: Commander> ClusterOps for C {
    async fn call(&self, node: &NodeAddr, cmd: &Command) -> Result<Reply> {
        self.execute(node, cmd).await
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn ping(&self, node: &NodeAddr) -> Result<bool> {
        let reply = self.execute(node, &Command::new("PING")).await?;
        Ok(reply.as_text().is_some_and(|s| s.trim() == "PONG"))
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn dbsize(&self, node: &NodeAddr) -> Result<u64> {
        let cmd = Command::new("DBSIZE");
        let reply = self.execute(node, &cmd).await?;
        reply
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| unexpected(node, &cmd, &reply))
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn flushall(&self, node: &NodeAddr) -> Result<()> {
        let cmd = Command::new("FLUSHALL");
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn config_get_maxmemory(&self, node: &NodeAddr) -> Result<u64> {
        let cmd = Command::new("CONFIG").arg("GET").arg("maxmemory");
        let reply = self.execute(node, &cmd).await?;
        // [name, value]
        reply
            .as_array()
            .and_then(|items| items.get(1))
            .and_then(Reply::as_integer)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| unexpected(node, &cmd, &reply))
    }

    async fn info(&self, node: &NodeAddr, section: Option<&str>) -> Result<String> {
        let mut cmd = Command::new("INFO");
        if let Some(section) = section {
            cmd = cmd.arg(section);
        }
        let reply = self.execute(node, &cmd).await?;
        match reply.as_text() {
            Some(text) => Ok(text.into_owned()),
            None => Err(refused(node, &cmd, &reply)),
        }
    }

    async fn info_cluster(&self, node: &NodeAddr) -> Result<ClusterInfoFields> {
        let text = self.info(node, Some("CLUSTER")).await?;
        Ok(ClusterInfoFields::parse(&text))
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn cluster_info(&self, node: &NodeAddr) -> Result<ClusterInfoFields> {
        let cmd = Command::new("CLUSTER").arg("INFO");
        let reply = self.execute(node, &cmd).await?;
        match reply.as_text() {
            Some(text) => Ok(ClusterInfoFields::parse(&text)),
            None => Err(refused(node, &cmd, &reply)),
        }
    }

    async fn cluster_nodes(&self, node: &NodeAddr) -> Result<String> {
        let cmd = Command::new("CLUSTER").arg("NODES");
        let reply = self.execute(node, &cmd).await?;
        match reply.as_text() {
            Some(text) => Ok(text.into_owned()),
            None => Err(refused(node, &cmd, &reply)),
        }
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn cluster_reset_hard(&self, node: &NodeAddr) -> Result<()> {
        let cmd = Command::new("CLUSTER").arg("RESET").arg("HARD");
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn cluster_set_config_epoch(&self, node: &NodeAddr, epoch: u64) -> Result<()> {
        let cmd = Command::new("CLUSTER").arg("SET-CONFIG-EPOCH").arg(epoch);
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node, slot_count = slots.len()))]
    async fn cluster_add_slots(&self, node: &NodeAddr, slots: &[u16]) -> Result<()> {
        if slots.is_empty() {
            return Ok(());
        }
        let cmd = Command::new("CLUSTER")
            .arg("ADDSLOTS")
            .args(slots.iter().copied());
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node, slot_count = slots.len()))]
    async fn cluster_del_slots(&self, node: &NodeAddr, slots: &[u16]) -> Result<()> {
        if slots.is_empty() {
            return Ok(());
        }
        let cmd = Command::new("CLUSTER")
            .arg("DELSLOTS")
            .args(slots.iter().copied());
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node, peer = %peer))]
    async fn cluster_meet(&self, node: &NodeAddr, peer: &NodeAddr) -> Result<()> {
        let cmd = Command::new("CLUSTER")
            .arg("MEET")
            .arg(&peer.host)
            .arg(peer.port);
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn cluster_forget(&self, node: &NodeAddr, node_id: &str) -> Result<()> {
        let cmd = Command::new("CLUSTER").arg("FORGET").arg(node_id);
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node, slot = slot))]
    async fn cluster_setslot(&self, node: &NodeAddr, slot: u16, state: SetSlot) -> Result<()> {
        let cmd = setslot_command(slot, &state);
        let reply = self.execute(node, &cmd).await?;
        expect_ok(node, &cmd, reply)
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn cluster_bump_epoch(&self, node: &NodeAddr) -> Result<()> {
        let cmd = Command::new("CLUSTER").arg("BUMPEPOCH");
        let reply = self.execute(node, &cmd).await?;
        match reply.as_text() {
            Some(text) if text.starts_with("BUMPED") || text.starts_with("STILL") => {
                debug!(reply = %text, "Epoch bump acknowledged");
                Ok(())
            }
            _ => Err(refused(node, &cmd, &reply)),
        }
    }

    async fn cluster_count_keys_in_slot(&self, node: &NodeAddr, slot: u16) -> Result<u64> {
        let cmd = Command::new("CLUSTER").arg("COUNTKEYSINSLOT").arg(slot);
        let reply = self.execute(node, &cmd).await?;
        if reply.as_error().is_some() {
            return Err(refused(node, &cmd, &reply));
        }
        reply
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| unexpected(node, &cmd, &reply))
    }

    async fn cluster_get_keys_in_slot(
        &self,
        node: &NodeAddr,
        slot: u16,
        count: u64,
    ) -> Result<Vec<Bytes>> {
        let cmd = Command::new("CLUSTER")
            .arg("GETKEYSINSLOT")
            .arg(slot)
            .arg(count);
        let reply = self.execute(node, &cmd).await?;
        if reply.as_error().is_some() {
            return Err(refused(node, &cmd, &reply));
        }
        let Some(items) = reply.clone().into_array() else {
            return Err(unexpected(node, &cmd, &reply));
        };
        items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(key) => Ok(key),
                Reply::Simple(key) => Ok(Bytes::from(key)),
                _ => Err(unexpected(node, &cmd, &reply)),
            })
            .collect()
    }

    #[instrument(skip_all, fields(node = %node, target = %target))]
    async fn migrate(
        &self,
        node: &NodeAddr,
        target: &NodeAddr,
        key: &Bytes,
        db: u32,
        timeout_ms: u64,
    ) -> Result<MigrateStatus> {
        let cmd = Command::new("MIGRATE")
            .arg(&target.host)
            .arg(target.port)
            .arg(key)
            .arg(db)
            .arg(timeout_ms);
        let reply = self.execute(node, &cmd).await?;
        match reply.as_text().as_deref() {
            Some("OK") => Ok(MigrateStatus::Ok),
            Some("NOKEY") => Ok(MigrateStatus::NoKey),
            _ => Err(refused(node, &cmd, &reply)),
        }
    }

    #[instrument(skip_all, fields(node = %node))]
    async fn shutdown(&self, node: &NodeAddr) -> Result<()> {
        let cmd = Command::new("SHUTDOWN");
        match self.execute(node, &cmd).await {
            Err(TribError::ConnectionClosed { .. }) => Ok(()),
            Err(e) => Err(e),
            Ok(reply) if reply.as_error().is_none() => Ok(()),
            Ok(reply) => Err(refused(node, &cmd, &reply)),
        }
    }
}
