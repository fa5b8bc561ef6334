//! Subcommand entry points against the mock cluster.

use std::time::Duration;

use valkey_trib::client::{ClusterOps, Reply};
use valkey_trib::commands::{
    CreateOptions, RebalanceCommandOptions, Report, add_node, call_cluster, check_cluster_cmd,
    create_cluster, del_node, rebalance_cluster, show_cluster_info,
};
use valkey_trib::repair::wait_for_cluster_join;
use valkey_trib::slots::TOTAL_SLOTS;
use valkey_trib::{ClusterSnapshot, TribConfig, TribError};

use crate::{MockCluster, addr, node_id};

fn standalone(ports: &[u16]) -> MockCluster {
    let cluster = MockCluster::new();
    for port in ports {
        cluster.add_node(*port);
    }
    cluster
}

fn four_masters_one_empty() -> MockCluster {
    MockCluster::with_masters([
        (7000, 0..5461),
        (7001, 5461..10923),
        (7002, 10923..TOTAL_SLOTS),
        (7003, 0..0),
    ])
}

// create

#[tokio::test]
async fn test_create_builds_a_healthy_cluster() {
    let cluster = standalone(&[7000, 7001, 7002]);
    let nodes = [addr(7000), addr(7001), addr(7002)];

    let report = create_cluster(&cluster, &TribConfig::default(), &nodes, CreateOptions::default())
        .await
        .unwrap();

    assert!(report.succeeded());
    assert!(!report.simulated);
    assert_eq!(report.assignments.len(), 3);
    assert_eq!(report.assignments[0].range.unwrap().start, 0);
    assert_eq!(report.assignments[2].range.unwrap().end, TOTAL_SLOTS - 1);
    let epochs: Vec<u64> = report.assignments.iter().map(|a| a.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3]);

    let total: usize = [7000, 7001, 7002]
        .iter()
        .map(|port| cluster.node(*port).slots.len())
        .sum();
    assert_eq!(total, usize::from(TOTAL_SLOTS));
    for port in [7000, 7001, 7002] {
        assert_eq!(cluster.node(port).known.len(), 3);
    }
    assert_eq!(cluster.commands_to(7001, "CLUSTER MEET"), vec!["CLUSTER MEET 127.0.0.1 7000"]);
    assert!(cluster.commands_to(7000, "CLUSTER MEET").is_empty());

    let check = report.check.unwrap();
    assert!(check.consistent);
    assert!(check.coverage.is_complete());
}

#[tokio::test]
async fn test_create_splits_slots_by_maxmemory() {
    let cluster = standalone(&[7000, 7001]);
    cluster.with_node(7000, |n| n.maxmemory = 3 * 1024 * 1024 * 1024);

    let report = create_cluster(
        &cluster,
        &TribConfig::default(),
        &[addr(7000), addr(7001)],
        CreateOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(cluster.node(7000).slots.len(), 12288);
    assert_eq!(cluster.node(7001).slots.len(), 4096);
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_create_refuses_node_with_keys_before_any_reset() {
    let cluster = standalone(&[7000, 7001, 7002]);
    cluster.add_keys(7002, 3, 1);

    let err = create_cluster(
        &cluster,
        &TribConfig::default(),
        &[addr(7000), addr(7001), addr(7002)],
        CreateOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(err.is_preflight());
    assert_eq!(cluster.count("CLUSTER RESET"), 0);
    assert_eq!(cluster.count("FLUSHALL"), 0);
    assert_eq!(cluster.node(7002).key_count(), 1);
}

#[tokio::test]
async fn test_create_force_flush_empties_nodes_with_keys() {
    let cluster = standalone(&[7000, 7001]);
    cluster.add_keys(7001, 3, 2);
    let options = CreateOptions {
        force_flush: true,
        ..CreateOptions::default()
    };

    let report = create_cluster(&cluster, &TribConfig::default(), &[addr(7000), addr(7001)], options)
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(cluster.commands_to(7001, "FLUSHALL").len(), 1);
    assert!(cluster.commands_to(7000, "FLUSHALL").is_empty());
    assert_eq!(cluster.node(7001).key_count(), 0);
}

#[tokio::test]
async fn test_create_simulation_changes_nothing() {
    let cluster = standalone(&[7000, 7001]);

    let report = create_cluster(
        &cluster,
        &TribConfig::default(),
        &[addr(7000), addr(7001)],
        CreateOptions {
            simulate: true,
            force_flush: false,
        },
    )
    .await
    .unwrap();

    assert!(report.simulated);
    assert!(report.check.is_none());
    assert!(report.succeeded());
    assert_eq!(report.assignments.len(), 2);
    assert_eq!(cluster.count("CLUSTER RESET"), 0);
    assert_eq!(cluster.count("CLUSTER ADDSLOTS"), 0);
    assert!(cluster.node(7000).slots.is_empty());
}

#[tokio::test]
async fn test_create_simulation_still_refuses_keys() {
    let cluster = standalone(&[7000, 7001]);
    cluster.add_keys(7000, 1, 1);
    let options = CreateOptions {
        simulate: true,
        force_flush: true,
    };

    let err = create_cluster(&cluster, &TribConfig::default(), &[addr(7000), addr(7001)], options)
        .await
        .unwrap_err();

    assert!(err.is_preflight());
    assert_eq!(cluster.count("FLUSHALL"), 0);
}

#[tokio::test]
async fn test_create_needs_two_nodes() {
    let cluster = standalone(&[7000]);

    let err = create_cluster(&cluster, &TribConfig::default(), &[addr(7000)], CreateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TribError::Preflight(msg) if msg == "You need at least 2 nodes"));
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_create_rejects_duplicate_addresses() {
    let cluster = standalone(&[7000]);

    let err = create_cluster(
        &cluster,
        &TribConfig::default(),
        &[addr(7000), addr(7000)],
        CreateOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TribError::DuplicateNode(_)));
}

#[tokio::test]
async fn test_create_rejects_node_without_cluster_mode() {
    let cluster = standalone(&[7000, 7001]);
    cluster.with_node(7001, |n| n.cluster_enabled = false);

    let err = create_cluster(
        &cluster,
        &TribConfig::default(),
        &[addr(7000), addr(7001)],
        CreateOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(err.is_preflight());
    assert!(err.to_string().contains("127.0.0.1:7001"));
    assert_eq!(cluster.count("CLUSTER RESET"), 0);
}

#[tokio::test]
async fn test_create_reports_unreachable_node() {
    let cluster = standalone(&[7000]);

    let err = create_cluster(
        &cluster,
        &TribConfig::default(),
        &[addr(7000), addr(7009)],
        CreateOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(err.is_connectivity());
}

// check / fix

#[tokio::test]
async fn test_check_healthy_cluster_output() {
    let cluster = MockCluster::three_masters();

    let report = check_cluster_cmd(&cluster, &TribConfig::default(), &addr(7001), false)
        .await
        .unwrap();

    assert!(report.succeeded());
    let text = report.to_string();
    assert!(text.starts_with(">>> Performing Cluster Check (using node 127.0.0.1:7001)\n"));
    assert!(text.contains("[OK] All nodes agree about slots configuration.\n"));
    assert!(text.contains("[OK] All 16384 slots covered.\n"));
    assert!(!text.contains("[WARNING]"));
}

#[tokio::test]
async fn test_check_detects_disagreement() {
    let cluster = MockCluster::three_masters();
    let view = cluster.cluster_nodes(&addr(7001)).await.unwrap();
    assert!(view.contains(" 10923-16383"));
    cluster.with_node(7001, |n| {
        n.nodes_override = Some(view.replace(" 10923-16383", " 10923-16000"));
    });

    let report = check_cluster_cmd(&cluster, &TribConfig::default(), &addr(7000), false)
        .await
        .unwrap();

    assert!(!report.consistent);
    assert!(!report.succeeded());
    assert!(report.to_string().contains("[ERR] Nodes don't agree about configuration!\n"));
}

#[tokio::test]
async fn test_snapshot_skips_peer_without_address() {
    let cluster = MockCluster::three_masters();
    let view = cluster.cluster_nodes(&addr(7000)).await.unwrap();
    cluster.with_node(7000, |n| {
        n.nodes_override = Some(format!("{}{} :0@0 master,noaddr - 0 0 9 connected\n", view, "f".repeat(40)));
    });

    let snapshot = ClusterSnapshot::load(&cluster, &addr(7000)).await.unwrap();

    assert_eq!(snapshot.nodes().len(), 3);
    assert!(snapshot.get(&"f".repeat(40)).is_none());
    assert_eq!(snapshot.masters().map(|n| n.slot_count()).sum::<usize>(), usize::from(TOTAL_SLOTS));
}

#[tokio::test]
async fn test_check_lists_missing_slots() {
    let cluster = MockCluster::with_masters([(7000, 0..8000), (7001, 8100..TOTAL_SLOTS)]);

    let report = check_cluster_cmd(&cluster, &TribConfig::default(), &addr(7000), false)
        .await
        .unwrap();

    assert!(!report.succeeded());
    let text = report.to_string();
    assert!(text.contains("[ERR] Not all 16384 slots are covered by nodes.\n"));
    assert!(text.contains("Missing slots: 8000-8099\n"));
}

#[tokio::test]
async fn test_fix_repairs_open_slot_and_reports_it() {
    let cluster = MockCluster::three_masters();
    cluster.add_keys(7000, 50, 2);
    cluster.set_migrating(7000, 50, 7001);
    cluster.set_importing(7001, 50, 7000);

    let report = check_cluster_cmd(&cluster, &TribConfig::default(), &addr(7000), true)
        .await
        .unwrap();

    assert!(report.succeeded());
    let text = report.to_string();
    assert!(text.contains("[WARNING] The following slots are open: 50\n"));
    assert!(text.contains("[OK] Slot 50 resolved (resumed live move)\n"));
    assert!(cluster.node(7001).slots.contains(&50));
    assert_eq!(cluster.node(7001).keys_in(50), 2);
}

#[tokio::test(start_paused = true)]
async fn test_join_wait_gives_up_after_timeout() {
    let cluster = MockCluster::three_masters();
    let view = cluster.cluster_nodes(&addr(7002)).await.unwrap();
    cluster.with_node(7002, |n| {
        n.nodes_override = Some(view.replace(" 0-5460", " 0-5000"));
    });
    let snapshot = ClusterSnapshot::load(&cluster, &addr(7000)).await.unwrap();
    let config = TribConfig::default()
        .with_join_poll_interval(Duration::from_secs(1))
        .with_join_timeout(Some(Duration::from_secs(5)));

    let err = wait_for_cluster_join(&cluster, &snapshot, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, TribError::Timeout { duration, .. } if duration == Duration::from_secs(5)));
}

// info

#[tokio::test]
async fn test_info_summarizes_keys_and_slots() {
    let cluster = MockCluster::three_masters();
    cluster.add_keys(7000, 1, 2);
    cluster.add_keys(7001, 6000, 3);
    cluster.set_migrating(7000, 1, 7001);

    let report = show_cluster_info(&cluster, &addr(7000)).await.unwrap();

    assert_eq!(report.nodes.len(), 3);
    assert_eq!(report.total_keys(), 5);
    assert_eq!(report.total_slots(), usize::from(TOTAL_SLOTS));
    let text = report.to_string();
    let first = text.lines().next().unwrap();
    assert!(first.starts_with("127.0.0.1:7000         | "));
    assert!(first.contains(&node_id(7000)));
    assert!(first.contains("2 keys"));
    assert!(first.contains("5461 slots"));
    assert!(first.ends_with("migrating 1(1) | importing 0()"));
    assert!(text.contains("\n5 keys\n"));
    assert!(text.ends_with("[OK] All 16384 slots covered.\n"));
}

// rebalance

#[tokio::test]
async fn test_rebalance_fills_empty_master() {
    let cluster = four_masters_one_empty();
    cluster.add_keys(7000, 0, 2);
    cluster.add_keys(7001, 5461, 1);
    let options = RebalanceCommandOptions {
        use_empty_masters: true,
        ..RebalanceCommandOptions::default()
    };

    let report = rebalance_cluster(&cluster, &TribConfig::default(), &addr(7000), &options)
        .await
        .unwrap();

    assert!(report.plan.threshold_reached);
    assert_eq!(report.moved_slots, 4096);
    assert_eq!(report.moved_keys, 3);
    assert_eq!(cluster.node(7003).keys_in(0), 2);
    assert_eq!(cluster.node(7003).keys_in(5461), 1);
    for port in [7000, 7001, 7002, 7003] {
        let node = cluster.node(port);
        assert_eq!(node.slots.len(), 4096, "{} slot count", port);
        assert!(node.migrating.is_empty());
        assert!(node.importing.is_empty());
    }
    assert!(
        report
            .to_string()
            .contains(">>> Moving 1366 slots from 127.0.0.1:7001 to 127.0.0.1:7003")
    );

    let rerun = rebalance_cluster(&cluster, &TribConfig::default(), &addr(7000), &options)
        .await
        .unwrap();
    assert!(!rerun.plan.threshold_reached);
    assert_eq!(rerun.moved_slots, 0);
    assert_eq!(
        rerun.to_string(),
        "*** No rebalancing needed! All nodes are within the 2% threshold.\n"
    );
}

#[tokio::test]
async fn test_rebalance_ignores_empty_masters_by_default() {
    let cluster = four_masters_one_empty();

    let report = rebalance_cluster(
        &cluster,
        &TribConfig::default(),
        &addr(7000),
        &RebalanceCommandOptions::default(),
    )
    .await
    .unwrap();

    assert!(!report.plan.threshold_reached);
    assert!(cluster.node(7003).slots.is_empty());
    assert_eq!(cluster.count("CLUSTER SETSLOT"), 0);
}

#[tokio::test]
async fn test_rebalance_simulation_moves_nothing() {
    let cluster = four_masters_one_empty();
    let options = RebalanceCommandOptions {
        simulate: true,
        use_empty_masters: true,
        ..RebalanceCommandOptions::default()
    };

    let report = rebalance_cluster(&cluster, &TribConfig::default(), &addr(7000), &options)
        .await
        .unwrap();

    assert!(report.plan.threshold_reached);
    assert_eq!(report.plan.slots_to_move(), 4096);
    assert_eq!(report.moved_slots, 0);
    assert_eq!(cluster.count("CLUSTER SETSLOT"), 0);
    assert!(
        report
            .to_string()
            .ends_with("[OK] Simulation done, 4096 slots would move.\n")
    );
}

#[tokio::test]
async fn test_rebalance_weight_override_shifts_slots() {
    let cluster = MockCluster::with_masters([(7000, 0..8192), (7001, 8192..TOTAL_SLOTS)]);
    let prefix = node_id(7001)[30..].to_string();
    let options = RebalanceCommandOptions {
        simulate: true,
        weights: vec![(prefix, 0)],
        ..RebalanceCommandOptions::default()
    };

    let err = rebalance_cluster(&cluster, &TribConfig::default(), &addr(7000), &options)
        .await
        .unwrap_err();

    // A prefix must match from the start of the id.
    assert!(err.is_preflight());

    let options = RebalanceCommandOptions {
        simulate: true,
        weights: vec![(node_id(7001), 0)],
        ..RebalanceCommandOptions::default()
    };
    let report = rebalance_cluster(&cluster, &TribConfig::default(), &addr(7000), &options)
        .await
        .unwrap();
    assert!(report.plan.threshold_reached);
    assert_eq!(report.plan.slots_to_move(), 8192);
    assert!(report.plan.movements.iter().all(|m| m.destination == node_id(7000)));
}

#[tokio::test]
async fn test_rebalance_rejects_unknown_weight_prefix() {
    let cluster = MockCluster::three_masters();
    let options = RebalanceCommandOptions {
        weights: vec![("ffff".to_string(), 2)],
        ..RebalanceCommandOptions::default()
    };

    let err = rebalance_cluster(&cluster, &TribConfig::default(), &addr(7000), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, TribError::Preflight(msg) if msg == "No such master node ffff"));
    assert_eq!(cluster.count("CONFIG GET"), 0);
}

// add-node / del-node

#[tokio::test]
async fn test_add_node_joins_the_cluster() {
    let cluster = MockCluster::three_masters();
    cluster.add_node(7003);

    let report = add_node(&cluster, &TribConfig::default(), &addr(7003), &addr(7000), false)
        .await
        .unwrap();

    assert!(report.check.is_healthy());
    assert_eq!(cluster.commands_to(7003, "CLUSTER MEET"), vec!["CLUSTER MEET 127.0.0.1 7000"]);
    for port in [7000, 7001, 7002, 7003] {
        assert!(cluster.node(port).known.contains(&node_id(7003)));
    }
    assert!(report.succeeded());
    assert!(report.to_string().ends_with("[OK] New node added correctly.\n"));
}

#[tokio::test]
async fn test_add_node_to_unhealthy_cluster_fails_the_run() {
    let cluster = MockCluster::with_masters([(7000, 0..8000), (7001, 8100..TOTAL_SLOTS)]);
    cluster.add_node(7003);

    let report = add_node(&cluster, &TribConfig::default(), &addr(7003), &addr(7000), false)
        .await
        .unwrap();

    assert!(!report.check.is_healthy());
    assert!(!report.succeeded());
    // The node still joins; only the exit status reflects the failed check.
    assert_eq!(cluster.commands_to(7003, "CLUSTER MEET"), vec!["CLUSTER MEET 127.0.0.1 7000"]);
    let text = report.to_string();
    assert!(text.contains("Missing slots: 8000-8099"));
    assert!(!text.contains("[OK] New node added correctly."));
    assert!(text.ends_with("[ERR] Node 127.0.0.1:7003 joined a cluster that failed its check.\n"));
}

#[tokio::test]
async fn test_add_node_simulation_sends_no_meet() {
    let cluster = MockCluster::three_masters();
    cluster.add_node(7003);

    let report = add_node(&cluster, &TribConfig::default(), &addr(7003), &addr(7000), true)
        .await
        .unwrap();

    assert!(report.simulated);
    assert_eq!(cluster.count("CLUSTER MEET"), 0);
    assert_eq!(cluster.node(7003).known.len(), 1);
}

#[tokio::test]
async fn test_add_node_refuses_node_with_keys() {
    let cluster = MockCluster::three_masters();
    cluster.add_node(7003);
    cluster.add_keys(7003, 5, 1);

    let err = add_node(&cluster, &TribConfig::default(), &addr(7003), &addr(7000), false)
        .await
        .unwrap_err();

    assert!(err.is_preflight());
    assert_eq!(cluster.count("CLUSTER MEET"), 0);
}

#[tokio::test]
async fn test_add_node_refuses_node_of_another_cluster() {
    let cluster = MockCluster::three_masters();

    let err = add_node(&cluster, &TribConfig::default(), &addr(7002), &addr(7000), false)
        .await
        .unwrap_err();

    assert!(err.is_preflight());
}

#[tokio::test]
async fn test_del_node_forgets_and_shuts_down() {
    let cluster = MockCluster::three_masters();
    cluster.add_replica(7003, 7000);

    let report = del_node(&cluster, &addr(7000), &node_id(7003)).await.unwrap();

    assert_eq!(report.removed, addr(7003));
    assert_eq!(report.forgotten_by, vec![addr(7000), addr(7001), addr(7002)]);
    for port in [7000, 7001, 7002] {
        assert!(!cluster.node(port).known.contains(&node_id(7003)));
    }
    assert!(cluster.node(7003).shut_down);
    assert_eq!(cluster.commands_to(7003, "SHUTDOWN").len(), 1);
}

#[tokio::test]
async fn test_del_node_refuses_node_with_slots() {
    let cluster = MockCluster::three_masters();

    let err = del_node(&cluster, &addr(7000), &node_id(7001)).await.unwrap_err();

    assert!(matches!(err, TribError::Preflight(msg) if msg.contains("is not empty")));
    assert_eq!(cluster.count("CLUSTER FORGET"), 0);
    assert!(!cluster.node(7001).shut_down);
}

#[tokio::test]
async fn test_del_node_needs_exact_id() {
    let cluster = MockCluster::three_masters();
    let prefix = &node_id(7001)[..20];

    let err = del_node(&cluster, &addr(7000), prefix).await.unwrap_err();

    assert!(matches!(err, TribError::NodeNotFound(_)));
}

// call

#[tokio::test]
async fn test_call_runs_on_every_node() {
    let cluster = MockCluster::three_masters();
    cluster.add_replica(7003, 7000);
    cluster.add_keys(7001, 1, 4);

    let report = call_cluster(&cluster, &addr(7000), &["dbsize".to_string()])
        .await
        .unwrap();

    let replies: Vec<(u16, Reply)> = report
        .replies
        .iter()
        .map(|(node, reply)| (node.port, reply.clone()))
        .collect();
    assert_eq!(
        replies,
        vec![
            (7000, Reply::Integer(0)),
            (7001, Reply::Integer(4)),
            (7002, Reply::Integer(0)),
            (7003, Reply::Integer(0)),
        ]
    );
    assert!(report.to_string().starts_with(">>> Calling dbsize\n127.0.0.1:7000: 0\n"));
}

#[tokio::test]
async fn test_call_collects_error_replies() {
    let cluster = MockCluster::three_masters();

    let report = call_cluster(&cluster, &addr(7000), &["NOSUCHCMD".to_string(), "x".to_string()])
        .await
        .unwrap();

    assert_eq!(report.replies.len(), 3);
    assert!(report.replies.iter().all(|(_, r)| matches!(r, Reply::Error(_))));
}

#[tokio::test]
async fn test_call_needs_a_command() {
    let cluster = MockCluster::three_masters();

    let err = call_cluster(&cluster, &addr(7000), &[]).await.unwrap_err();

    assert!(err.is_preflight());
    assert!(cluster.commands().is_empty());
}
