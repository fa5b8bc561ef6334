//! Rebalance planning - computes what needs to move, no I/O.
//!
//! Each master gets a target slot count proportional to its weight. The
//! difference to its current count is its balance: positive balances give
//! slots away, negative balances receive. Givers and receivers are then
//! paired with a two-pointer sweep over the balance-sorted masters.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::client::types::{NodeAddr, NodeId};
use crate::config::REBALANCE_DEFAULT_THRESHOLD;
use crate::topology::ClusterSnapshot;

use super::distribution::TOTAL_SLOTS;

/// A planned transfer of slots between two masters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotsMovement {
    /// Node giving the slots.
    pub source: NodeId,
    /// Node receiving the slots.
    pub destination: NodeId,
    /// Slots to move, in the order they will be moved.
    pub slots: Vec<u16>,
}

/// Inputs to [`plan_rebalance`].
#[derive(Debug, Clone)]
pub struct RebalanceOptions {
    /// Allowed deviation from the target, in percent of the current count.
    pub threshold: f64,
    /// Give slots to masters that currently own none.
    pub use_empty_masters: bool,
    /// Explicit weights by full node id; overrides `maxmemory`.
    pub weights: HashMap<NodeId, u64>,
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            threshold: REBALANCE_DEFAULT_THRESHOLD,
            use_empty_masters: false,
            weights: HashMap::new(),
        }
    }
}

/// Computed balance of one master.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeBalance {
    pub name: NodeId,
    pub addr: NodeAddr,
    pub weight: u64,
    pub slot_count: usize,
    pub target: i64,
    pub balance: i64,
    pub over_threshold: bool,
}

/// Result of planning a rebalance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebalancePlan {
    /// Balances after the sum correction, lowest first.
    pub balances: Vec<NodeBalance>,
    /// At least one master deviates more than the threshold allows.
    pub threshold_reached: bool,
    /// Movements to execute, in order.
    pub movements: Vec<SlotsMovement>,
}

impl RebalancePlan {
    /// Check if nothing has to move.
    pub fn is_noop(&self) -> bool {
        self.movements.is_empty()
    }

    /// Total number of slots that will move.
    pub fn slots_to_move(&self) -> usize {
        self.movements.iter().map(|m| m.slots.len()).sum()
    }
}

/// Check if a master's deviation from its target exceeds `threshold` percent.
///
/// The deviation is `100 - 100 × target / count`, rounded to two decimals. A
/// master without slots is over threshold whenever it should receive some.
pub fn is_over_threshold(slot_count: usize, target: i64, threshold: f64) -> bool {
    if slot_count == 0 {
        return target > 0;
    }
    let deviation = 100.0 - 100.0 * target as f64 / slot_count as f64;
    let deviation = (deviation * 100.0).round() / 100.0;
    deviation.abs() > threshold
}

/// Force the balances to sum to zero without touching positive ones.
///
/// A surplus is absorbed by lowering the most negative balances one unit at a
/// time, round robin; when no balance is negative, balanced masters are
/// lowered instead. A deficit is absorbed by raising negative balances. If
/// every balance is positive the surplus is left as is.
pub fn correct_balance_sum(balances: &mut [NodeBalance]) {
    let mut total: i64 = balances.iter().map(|b| b.balance).sum();

    while total != 0 {
        let mut order: Vec<&mut NodeBalance> = balances.iter_mut().collect();
        order.sort_by_key(|b| b.balance);
        let has_negative = order.first().is_some_and(|b| b.balance < 0);
        let mut changed = false;

        for entry in order {
            if total == 0 {
                break;
            }
            if total > 0 && (entry.balance < 0 || (!has_negative && entry.balance == 0)) {
                entry.balance -= 1;
                total -= 1;
                changed = true;
            } else if total < 0 && entry.balance < 0 {
                entry.balance += 1;
                total += 1;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
}

/// Resolve the weight of every master.
fn resolve_weights(snapshot: &ClusterSnapshot, options: &RebalanceOptions) -> Vec<u64> {
    let eligible = |slots: usize| options.use_empty_masters || slots > 0;

    let weights: Vec<u64> = snapshot
        .masters()
        .map(|node| {
            if !eligible(node.slot_count()) {
                0
            } else if let Some(weight) = options.weights.get(&node.name) {
                *weight
            } else {
                node.maxmemory
            }
        })
        .collect();

    if weights.iter().any(|w| *w > 0) {
        return weights;
    }

    // No usable capacity figures, weigh every eligible master equally.
    snapshot
        .masters()
        .map(|node| u64::from(eligible(node.slot_count())))
        .collect()
}

/// Pair receivers with givers over balance-sorted masters.
///
/// Receivers are consumed from the front, givers from the back. Slots are
/// taken from the front of the giver's remaining slots.
fn plan_movements(
    sorted: &[NodeBalance],
    remaining: &mut HashMap<NodeId, VecDeque<u16>>,
) -> Vec<SlotsMovement> {
    let mut movements = Vec::new();
    let mut balances: Vec<i64> = sorted.iter().map(|b| b.balance).collect();
    if balances.len() < 2 {
        return movements;
    }

    let mut dst_idx = 0usize;
    let mut src_idx = balances.len() - 1;

    while dst_idx < src_idx {
        let (Some(&dst_balance), Some(&src_balance)) = (balances.get(dst_idx), balances.get(src_idx))
        else {
            break;
        };
        if dst_balance >= 0 {
            dst_idx += 1;
            continue;
        }
        if src_balance <= 0 {
            src_idx -= 1;
            continue;
        }

        let count = (-dst_balance).min(src_balance);
        if let (Some(dst), Some(src)) = (sorted.get(dst_idx), sorted.get(src_idx)) {
            let slots: Vec<u16> = remaining
                .get_mut(&src.name)
                .map(|queue| {
                    let take = usize::try_from(count).unwrap_or(0).min(queue.len());
                    queue.drain(..take).collect()
                })
                .unwrap_or_default();
            if !slots.is_empty() {
                movements.push(SlotsMovement {
                    source: src.name.clone(),
                    destination: dst.name.clone(),
                    slots,
                });
            }
        }

        if let Some(b) = balances.get_mut(dst_idx) {
            *b += count;
        }
        if let Some(b) = balances.get_mut(src_idx) {
            *b -= count;
        }
        if dst_balance + count == 0 {
            dst_idx += 1;
        }
        if src_balance - count == 0 {
            src_idx -= 1;
        }
    }

    movements
}

/// Plan a rebalance of the masters in `snapshot`.
///
/// Masters' `maxmemory` must already be filled in when no explicit weight is
/// given. The resolved weight, target and corrected balance are written back
/// to each master. When no master is over the threshold the plan is empty.
pub fn plan_rebalance(snapshot: &mut ClusterSnapshot, options: &RebalanceOptions) -> RebalancePlan {
    let weights = resolve_weights(snapshot, options);
    let total_weight: u64 = weights.iter().sum();
    if total_weight == 0 {
        return RebalancePlan::default();
    }

    // The numerator is one less than the slot count.
    let per_slot_weight = f64::from(TOTAL_SLOTS - 1) / total_weight as f64;

    let mut balances: Vec<NodeBalance> = snapshot
        .masters()
        .zip(&weights)
        .map(|(node, weight)| {
            let target = (per_slot_weight * *weight as f64).round() as i64;
            let slot_count = node.slot_count();
            NodeBalance {
                name: node.name.clone(),
                addr: node.addr.clone(),
                weight: *weight,
                slot_count,
                target,
                balance: slot_count as i64 - target,
                over_threshold: is_over_threshold(slot_count, target, options.threshold),
            }
        })
        .collect();

    let threshold_reached = balances.iter().any(|b| b.over_threshold);
    if !threshold_reached {
        record_balances(snapshot, &balances);
        return RebalancePlan {
            balances,
            threshold_reached,
            movements: Vec::new(),
        };
    }

    correct_balance_sum(&mut balances);
    balances.sort_by_key(|b| b.balance);
    record_balances(snapshot, &balances);

    let mut remaining: HashMap<NodeId, VecDeque<u16>> = snapshot
        .masters()
        .map(|node| (node.name.clone(), node.slots.iter().copied().collect()))
        .collect();
    let movements = plan_movements(&balances, &mut remaining);

    RebalancePlan {
        balances,
        threshold_reached,
        movements,
    }
}

/// Mirror weight, target and balance onto the snapshot's masters.
fn record_balances(snapshot: &mut ClusterSnapshot, balances: &[NodeBalance]) {
    for balance in balances {
        if let Some(node) = snapshot.get_mut(&balance.name) {
            node.weight = balance.weight;
            node.target_slot_count = balance.target;
            node.balance = balance.balance;
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::topology::Node;

    fn master(name: &str, port: u16, slots: std::ops::Range<u16>, maxmemory: u64) -> Node {
        let mut node = Node::new(NodeAddr::new("127.0.0.1", port));
        node.name = name.to_string();
        node.is_master = true;
        node.maxmemory = maxmemory;
        node.slots = slots.collect();
        node
    }

    fn balance(name: &str, value: i64) -> NodeBalance {
        NodeBalance {
            name: name.to_string(),
            addr: NodeAddr::new("127.0.0.1", 7000),
            weight: 1,
            slot_count: 0,
            target: 0,
            balance: value,
            over_threshold: false,
        }
    }

    #[test]
    fn test_is_over_threshold() {
        // 5461 of 5462 is a 0.02% deviation
        assert!(!is_over_threshold(5462, 5461, 2.0));
        assert!(is_over_threshold(5462, 5461, 0.0));
        assert!(is_over_threshold(8192, 5461, 2.0));
        assert!(is_over_threshold(0, 10, 2.0));
        assert!(!is_over_threshold(0, 0, 2.0));
    }

    #[test]
    fn test_correct_surplus_lowers_most_negative_first() {
        let mut balances = vec![balance("a", -3), balance("b", -1), balance("c", 6)];
        correct_balance_sum(&mut balances);
        assert_eq!(balances.iter().map(|b| b.balance).sum::<i64>(), 0);
        assert_eq!(balances[0].balance, -4);
        assert_eq!(balances[1].balance, -2);
        assert_eq!(balances[2].balance, 6);
    }

    #[test]
    fn test_correct_surplus_without_negative_uses_balanced_nodes() {
        let mut balances = vec![balance("a", 1), balance("b", 0), balance("c", 0)];
        correct_balance_sum(&mut balances);
        assert_eq!(balances.iter().map(|b| b.balance).sum::<i64>(), 0);
        assert_eq!(balances[0].balance, 1);
    }

    #[test]
    fn test_correct_deficit_raises_negatives() {
        let mut balances = vec![balance("a", -3), balance("b", 2)];
        correct_balance_sum(&mut balances);
        assert_eq!(balances[0].balance, -2);
        assert_eq!(balances[1].balance, 2);
    }

    #[test]
    fn test_correct_all_positive_is_left_alone() {
        let mut balances = vec![balance("a", 1), balance("b", 1)];
        correct_balance_sum(&mut balances);
        assert_eq!(balances[0].balance, 1);
        assert_eq!(balances[1].balance, 1);
    }

    #[test]
    fn test_plan_balanced_cluster_is_noop() {
        let mut snapshot = ClusterSnapshot::from_nodes([
            master("a", 7000, 0..5462, 100),
            master("b", 7001, 5462..10923, 100),
            master("c", 7002, 10923..16384, 100),
        ])
        .unwrap();
        let plan = plan_rebalance(&mut snapshot, &RebalanceOptions::default());
        assert!(!plan.threshold_reached);
        assert!(plan.is_noop());
        assert_eq!(plan.balances.len(), 3);

        // Balances are recorded even when nothing moves.
        let a = snapshot.get("a").unwrap();
        assert_eq!(a.weight, 100);
        assert_eq!(a.target_slot_count, 5461);
        assert_eq!(a.balance, 1);
        assert_eq!(snapshot.get("c").unwrap().balance, 0);
    }

    #[test]
    fn test_plan_moves_slots_to_empty_master() {
        let mut snapshot = ClusterSnapshot::from_nodes([
            master("a", 7000, 0..8192, 100),
            master("b", 7001, 8192..16384, 100),
            master("c", 7002, 0..0, 100),
        ])
        .unwrap();
        let options = RebalanceOptions {
            use_empty_masters: true,
            ..Default::default()
        };
        let plan = plan_rebalance(&mut snapshot, &options);

        assert!(plan.threshold_reached);
        assert_eq!(plan.balances.iter().map(|b| b.balance).sum::<i64>(), 0);
        assert!(plan.movements.iter().all(|m| m.destination == "c"));
        assert_eq!(plan.slots_to_move(), 5462);
        // slots leave from the front of each giver
        let first = plan.movements.first().unwrap();
        let giver_start = if first.source == "a" { 0 } else { 8192 };
        assert_eq!(first.slots.first().copied(), Some(giver_start));
        assert_eq!(snapshot.get("c").unwrap().target_slot_count, 5461);
    }

    #[test]
    fn test_plan_excludes_empty_masters_by_default() {
        let mut snapshot = ClusterSnapshot::from_nodes([
            master("a", 7000, 0..8192, 100),
            master("b", 7001, 8192..16384, 100),
            master("c", 7002, 0..0, 100),
        ])
        .unwrap();
        let plan = plan_rebalance(&mut snapshot, &RebalanceOptions::default());
        assert!(plan.is_noop());
        assert_eq!(plan.balances.iter().find(|b| b.name == "c").unwrap().weight, 0);
    }

    #[test]
    fn test_plan_respects_weight_override() {
        let mut snapshot = ClusterSnapshot::from_nodes([
            master("a", 7000, 0..8192, 100),
            master("b", 7001, 8192..16384, 100),
        ])
        .unwrap();
        let options = RebalanceOptions {
            weights: HashMap::from([("a".to_string(), 300)]),
            ..Default::default()
        };
        let plan = plan_rebalance(&mut snapshot, &options);
        let a = plan.balances.iter().find(|b| b.name == "a").unwrap();
        assert_eq!(a.target, 12287);
        assert_eq!(plan.movements.len(), 1);
        assert_eq!(plan.movements[0].source, "b");
        assert_eq!(plan.movements[0].destination, "a");
        assert_eq!(plan.movements[0].slots.first().copied(), Some(8192));
    }

    #[test]
    fn test_plan_zero_maxmemory_weighs_equally() {
        let mut snapshot = ClusterSnapshot::from_nodes([
            master("a", 7000, 0..12000, 0),
            master("b", 7001, 12000..16384, 0),
        ])
        .unwrap();
        let plan = plan_rebalance(&mut snapshot, &RebalanceOptions::default());
        assert!(plan.threshold_reached);
        assert_eq!(plan.movements.len(), 1);
        assert_eq!(plan.movements[0].source, "a");
    }

    #[test]
    fn test_movements_never_pair_same_sign() {
        let sorted = vec![balance("a", -2), balance("b", 0), balance("c", 0), balance("d", 2)];
        let mut remaining = HashMap::from([("d".to_string(), VecDeque::from(vec![1, 2, 3]))]);
        let movements = plan_movements(&sorted, &mut remaining);
        assert_eq!(
            movements,
            vec![SlotsMovement {
                source: "d".to_string(),
                destination: "a".to_string(),
                slots: vec![1, 2],
            }]
        );
    }
}
