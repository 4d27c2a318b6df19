//! Fixpoint convergence, movement bounds, determinism, and metrics.

use std::sync::Arc;

use registry_balancer::{
    BalancerMetrics, DefaultSlotBalancer, SlotBalancer, SlotTableBuilder, diff_tables,
    new_balancer,
};

use crate::fixtures::{assert_table_invariants, balance_to_fixpoint, members};

const SERVERS_5: [&str; 5] = ["s1", "s2", "s3", "s4", "s5"];
const SERVERS_6: [&str; 6] = ["s1", "s2", "s3", "s4", "s5", "s6"];

/// Bootstrapping a larger cluster and then growing it settles every server
/// inside the `[floor, ceil]` band for both leader and follower load.
#[test]
fn test_join_converges_within_watermarks() {
    let builder = SlotTableBuilder::new(16, 2);
    let (seed, _) = balance_to_fixpoint(builder, &SERVERS_5, 64);
    assert_table_invariants(&seed, &SERVERS_5, 2);

    let builder = SlotTableBuilder::from_table(&seed, 2);
    let (table, _) = balance_to_fixpoint(builder, &SERVERS_6, 64);
    assert_table_invariants(&table, &SERVERS_6, 2);

    // 16 slots over 6 servers: ceil 3, floor 2, for leaders and followers
    for server in SERVERS_6 {
        let projection = table.data_node_slot(server);
        assert!(
            (2..=3).contains(&projection.leaders().len()),
            "{server} leads {} slots",
            projection.leaders().len()
        );
        assert!(
            (2..=3).contains(&projection.followers().len()),
            "{server} follows {} slots",
            projection.followers().len()
        );
    }
}

/// Every round after a membership change stays within the movement caps.
#[test]
fn test_rounds_are_movement_bounded() {
    let builder = SlotTableBuilder::new(32, 2);
    let (seed, _) = balance_to_fixpoint(builder, &["s1", "s2", "s3"], 64);

    let builder = SlotTableBuilder::from_table(&seed, 2);
    let mut balancer = new_balancer(builder, members(&["s1", "s2", "s3", "s4"]));

    // 32 slots derive a cap of 4 moves per round
    let mut prev = seed;
    let mut rounds = 0;
    while let Some(table) = balancer.balance().expect("balance round") {
        let diff = diff_tables(&prev, &table);
        assert!(
            diff.moved_slot_count() <= 4,
            "round changed {} slots, cap is 4",
            diff.moved_slot_count()
        );
        prev = table;
        rounds += 1;
        assert!(rounds <= 64, "join did not converge");
    }
}

/// The epoch grows by exactly one per changed round and never otherwise.
#[test]
fn test_epoch_strictly_increases_per_round() {
    let builder = SlotTableBuilder::new(8, 2);
    let mut balancer = new_balancer(builder, members(&["s1", "s2", "s3"]));

    let mut expected_epoch = 1;
    while let Some(table) = balancer.balance().expect("balance round") {
        assert_eq!(table.epoch(), expected_epoch);
        expected_epoch += 1;
        assert!(expected_epoch < 64, "bootstrap did not converge");
    }
}

/// Two independent runs over identical input produce byte-identical tables.
#[test]
fn test_identical_input_identical_output() {
    let run = || {
        let builder = SlotTableBuilder::new(16, 3);
        let (seed, _) = balance_to_fixpoint(builder, &SERVERS_5, 64);
        let builder = SlotTableBuilder::from_table(&seed, 3);
        let (table, _) = balance_to_fixpoint(builder, &["s1", "s2", "s4", "s5"], 64);
        serde_json::to_string(&table).expect("serializable table")
    };

    assert_eq!(run(), run());
}

/// Round counters label the resolving phase and the outcome.
#[test]
fn test_metrics_record_rounds() {
    let metrics = Arc::new(BalancerMetrics::new());
    let builder = SlotTableBuilder::new(8, 2);
    let mut balancer = DefaultSlotBalancer::new(builder, members(&["s1", "s2"]))
        .with_metrics(metrics.clone());

    while balancer.balance().expect("balance round").is_some() {}

    let encoded = metrics.encode();
    assert!(encoded.contains("phase=\"repair\""));
    assert!(encoded.contains("outcome=\"changed\""));
    assert!(encoded.contains("outcome=\"no_change\""));
}
