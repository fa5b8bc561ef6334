//! `rebalance`: move slots so each master holds a share matching its weight.

use std::collections::HashMap;
use std::fmt;

use tracing::{info, instrument};

use super::Report;
use crate::client::cluster_ops::ClusterOps;
use crate::client::types::NodeAddr;
use crate::client::valkey_client::Commander;
use crate::config::{REBALANCE_DEFAULT_THRESHOLD, TribConfig};
use crate::error::{Result, TribError};
use crate::slots::migration::{MigrationEngine, MoveOptions};
use crate::slots::planner::{RebalanceOptions, RebalancePlan, plan_rebalance};
use crate::topology::ClusterSnapshot;

/// Flags for [`rebalance_cluster`].
#[derive(Debug, Clone)]
pub struct RebalanceCommandOptions {
    /// Plan without moving anything.
    pub simulate: bool,
    /// Give slots to masters that own none.
    pub use_empty_masters: bool,
    /// Allowed deviation in percent.
    pub threshold: f64,
    /// `(node id prefix, weight)` overrides.
    pub weights: Vec<(String, u64)>,
}

impl Default for RebalanceCommandOptions {
    fn default() -> Self {
        Self {
            simulate: false,
            use_empty_masters: false,
            threshold: REBALANCE_DEFAULT_THRESHOLD,
            weights: Vec::new(),
        }
    }
}

/// Outcome of [`rebalance_cluster`].
#[derive(Debug, Clone)]
pub struct RebalanceReport {
    pub plan: RebalancePlan,
    pub threshold: f64,
    pub simulated: bool,
    /// Slots actually moved.
    pub moved_slots: usize,
    /// Keys migrated along with those slots.
    pub moved_keys: u64,
    addrs: HashMap<String, NodeAddr>,
}

impl RebalanceReport {
    fn label(&self, name: &str) -> String {
        self.addrs
            .get(name)
            .map_or_else(|| name.to_string(), ToString::to_string)
    }
}

impl fmt::Display for RebalanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.plan.threshold_reached {
            return writeln!(
                f,
                "*** No rebalancing needed! All nodes are within the {}% threshold.",
                self.threshold
            );
        }
        for balance in &self.plan.balances {
            writeln!(f, "{} balance is {} slots", balance.addr, balance.balance)?;
        }
        for movement in &self.plan.movements {
            writeln!(
                f,
                ">>> Moving {} slots from {} to {}",
                movement.slots.len(),
                self.label(&movement.source),
                self.label(&movement.destination)
            )?;
        }
        if self.simulated {
            writeln!(f, "[OK] Simulation done, {} slots would move.", self.plan.slots_to_move())
        } else {
            writeln!(
                f,
                "[OK] Moved {} slots ({} keys).",
                self.moved_slots, self.moved_keys
            )
        }
    }
}

impl Report for RebalanceReport {}

/// Resolve `(prefix, weight)` pairs to full master ids.
fn resolve_weight_overrides(
    snapshot: &ClusterSnapshot,
    overrides: &[(String, u64)],
) -> Result<HashMap<String, u64>> {
    let mut weights = HashMap::new();
    for (prefix, weight) in overrides {
        let node = snapshot
            .find_by_prefix(prefix)
            .map_err(|e| match e {
                TribError::NodeNotFound(_) => {
                    TribError::Preflight(format!("No such master node {}", prefix))
                }
                other => other,
            })?;
        if !node.is_master {
            return Err(TribError::Preflight(format!(
                "No such master node {}",
                prefix
            )));
        }
        weights.insert(node.name.clone(), *weight);
    }
    Ok(weights)
}

/// Rebalance the cluster known to `seed`.
#[instrument(skip_all, fields(seed = %seed, simulate = options.simulate))]
pub async fn rebalance_cluster<C: Commander>(
    client: &C,
    config: &TribConfig,
    seed: &NodeAddr,
    options: &RebalanceCommandOptions,
) -> Result<RebalanceReport> {
    let mut snapshot = ClusterSnapshot::load(client, seed).await?;
    let planner_options = RebalanceOptions {
        threshold: options.threshold,
        use_empty_masters: options.use_empty_masters,
        weights: resolve_weight_overrides(&snapshot, &options.weights)?,
    };

    for node in snapshot.masters_mut() {
        let eligible = options.use_empty_masters || node.slot_count() > 0;
        if eligible && !planner_options.weights.contains_key(&node.name) {
            node.maxmemory = client.config_get_maxmemory(&node.addr).await?;
        }
    }

    let plan = plan_rebalance(&mut snapshot, &planner_options);
    let addrs = snapshot
        .nodes()
        .iter()
        .map(|n| (n.name.clone(), n.addr.clone()))
        .collect();

    let mut moved_slots = 0;
    let mut moved_keys = 0;
    if plan.threshold_reached && !options.simulate {
        let engine = MigrationEngine::new(client, config);
        let move_options = MoveOptions {
            quiet: true,
            update: true,
            ..MoveOptions::default()
        };
        for movement in &plan.movements {
            info!(
                slots = movement.slots.len(),
                source = %movement.source,
                destination = %movement.destination,
                "Moving slots"
            );
            for slot in &movement.slots {
                let moved = engine
                    .move_slot(
                        &mut snapshot,
                        &movement.source,
                        &movement.destination,
                        *slot,
                        move_options,
                    )
                    .await?;
                moved_slots += 1;
                moved_keys += moved.keys_migrated;
            }
        }
    }

    Ok(RebalanceReport {
        plan,
        threshold: options.threshold,
        simulated: options.simulate,
        moved_slots,
        moved_keys,
        addrs,
    })
}
