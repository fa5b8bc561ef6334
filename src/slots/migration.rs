//! Live migration of one slot between two masters.
//!
//! The protocol:
//! 1. SETSLOT IMPORTING on the destination
//! 2. SETSLOT MIGRATING on the source
//! 3. GETKEYSINSLOT / MIGRATE until the slot is empty on the source
//! 4. SETSLOT NODE on every master
//!
//! Cold moves skip steps 1, 2 and 4 and only transfer keys; they are used to
//! consolidate keys during open-slot repair where the caller settles
//! ownership itself.

use tracing::{debug, error, info, instrument};

use crate::client::cluster_ops::{ClusterOps, MigrateStatus, SetSlot};
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::config::TribConfig;
use crate::error::{Result, TribError};
use crate::topology::ClusterSnapshot;

/// Keys transferred by one finished slot move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMove {
    /// The slot that moved.
    pub slot: u16,
    /// Keys acknowledged with `OK`.
    pub keys_migrated: u64,
    /// Keys acknowledged with `NOKEY`, expired or deleted mid-move.
    pub keys_missing: u64,
}

impl SlotMove {
    fn record(&mut self, status: MigrateStatus) {
        match status {
            MigrateStatus::Ok => self.keys_migrated += 1,
            MigrateStatus::NoKey => self.keys_missing += 1,
        }
    }
}

/// Flags for [`MigrationEngine::move_slot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveOptions {
    /// Only transfer keys: no IMPORTING/MIGRATING and no final SETSLOT NODE.
    pub cold: bool,
    /// Log the move at debug instead of info level.
    pub quiet: bool,
    /// Mirror the ownership change into the snapshot.
    pub update: bool,
}

impl MoveOptions {
    /// Options for a cold key transfer.
    pub fn cold() -> Self {
        Self {
            cold: true,
            ..Self::default()
        }
    }
}

/// Moves slots between masters with live key migration.
pub struct MigrationEngine<'a, C> {
    client: &'a C,
    config: &'a TribConfig,
}

impl<'a, C: Commander> MigrationEngine<'a, C> {
    /// Create an engine issuing commands through `client`.
    pub fn new(client: &'a C, config: &'a TribConfig) -> Self {
        Self { client, config }
    }

    /// Move `slot` from `source` to `destination`, both given by node id.
    ///
    /// Any refused command aborts the move and leaves the slot open for a
    /// later `fix`.
    #[instrument(skip(self, snapshot))]
    pub async fn move_slot(
        &self,
        snapshot: &mut ClusterSnapshot,
        source: &str,
        destination: &str,
        slot: u16,
        options: MoveOptions,
    ) -> Result<SlotMove> {
        let source_addr = node_addr(snapshot, source)?;
        let destination_addr = node_addr(snapshot, destination)?;

        if options.quiet {
            debug!(slot, from = %source_addr, to = %destination_addr, "Moving slot");
        } else {
            info!(slot, from = %source_addr, to = %destination_addr, "Moving slot");
        }

        let mut moved = SlotMove {
            slot,
            ..SlotMove::default()
        };
        let outcome = self
            .drive(
                snapshot,
                &mut moved,
                (source, destination),
                (&source_addr, &destination_addr),
                options,
            )
            .await;

        if let Err(e) = &outcome {
            error!(
                slot,
                keys_migrated = moved.keys_migrated,
                error = %e,
                "Slot move failed"
            );
        }
        outcome.map(|()| moved)
    }

    async fn drive(
        &self,
        snapshot: &mut ClusterSnapshot,
        moved: &mut SlotMove,
        (source, destination): (&str, &str),
        (source_addr, destination_addr): (&NodeAddr, &NodeAddr),
        options: MoveOptions,
    ) -> Result<()> {
        let slot = moved.slot;

        if !options.cold {
            self.client
                .cluster_setslot(destination_addr, slot, SetSlot::Importing(source.to_string()))
                .await?;
            self.client
                .cluster_setslot(source_addr, slot, SetSlot::Migrating(destination.to_string()))
                .await?;
        }

        loop {
            let keys = self
                .client
                .cluster_get_keys_in_slot(source_addr, slot, self.config.keys_batch_size)
                .await?;
            let Some(key) = keys.first() else {
                break;
            };

            let status = self
                .client
                .migrate(
                    source_addr,
                    destination_addr,
                    key,
                    self.config.migrate_db,
                    self.config.migrate_timeout_ms,
                )
                .await?;
            moved.record(status);

            if options.update {
                snapshot.transfer_slot(slot, source, destination);
            }
        }

        if options.update {
            snapshot.transfer_slot(slot, source, destination);
        }

        if !options.cold {
            for addr in snapshot.master_addrs() {
                self.client
                    .cluster_setslot(&addr, slot, SetSlot::Node(destination.to_string()))
                    .await?;
            }
        }

        Ok(())
    }
}

fn node_addr(snapshot: &ClusterSnapshot, name: &str) -> Result<NodeAddr> {
    snapshot
        .get(name)
        .map(|n| n.addr.clone())
        .ok_or_else(|| TribError::NodeNotFound(name.to_string()))
}
