//! Literal placement scenarios: bootstrap, join, leave, steady state, and
//! leader-only clusters.

use registry_balancer::{SlotBalancer, SlotTableBuilder, diff_tables, new_balancer};

use crate::fixtures::{
    assert_table_invariants, balance_to_fixpoint, follower_counts, init_tracing, leader_counts,
    members,
};

/// A single server takes every slot in one round.
#[test]
fn test_trivial_placement_single_server() {
    init_tracing();
    let builder = SlotTableBuilder::new(4, 1);
    let mut balancer = new_balancer(builder, members(&["a"]));

    let table = balancer
        .balance()
        .expect("live membership")
        .expect("assignment changes state");
    assert_eq!(table.epoch(), 1);
    for (_, slot) in table.iter() {
        assert_eq!(slot.leader().map(String::as_str), Some("a"));
        assert!(slot.followers().is_empty());
    }

    assert!(balancer.balance().unwrap().is_none());
}

/// Three servers, replica factor 2: the fixpoint gives every server two
/// leader slots and two follower slots, never both roles on one slot.
#[test]
fn test_balanced_three_way_fixpoint() {
    let builder = SlotTableBuilder::new(6, 2);
    let (table, rounds) = balance_to_fixpoint(builder, &["a", "b", "c"], 16);

    assert!(rounds >= 1);
    assert_table_invariants(&table, &["a", "b", "c"], 2);
    assert_eq!(leader_counts(&table, &["a", "b", "c"]), vec![2, 2, 2]);
    assert_eq!(follower_counts(&table, &["a", "b", "c"]), vec![2, 2, 2]);
}

/// A fourth server joins a balanced cluster: load drains onto it across
/// rounds, each round bounded by the leader movement cap.
#[test]
fn test_server_join_rebalances_within_watermarks() {
    init_tracing();
    let builder = SlotTableBuilder::new(6, 2);
    let (seed, _) = balance_to_fixpoint(builder, &["a", "b", "c"], 16);

    let builder = SlotTableBuilder::from_table(&seed, 2);
    let mut balancer = new_balancer(builder, members(&["a", "b", "c", "d"]));

    let mut prev = seed;
    let mut rounds = 0;
    while let Some(table) = balancer.balance().expect("balance round") {
        let diff = diff_tables(&prev, &table);
        assert!(
            diff.leader_moves() <= 2,
            "round moved {} leaders, cap is 2",
            diff.leader_moves()
        );
        assert!(table.epoch() > prev.epoch());
        prev = table;
        rounds += 1;
        assert!(rounds <= 16, "join did not converge");
    }

    // ceil = 2, floor = 1 for six slots over four servers
    assert_table_invariants(&prev, &["a", "b", "c", "d"], 2);
    for count in leader_counts(&prev, &["a", "b", "c", "d"]) {
        assert!((1..=2).contains(&count), "leader count {count} off watermark");
    }
    for count in follower_counts(&prev, &["a", "b", "c", "d"]) {
        assert!((1..=2).contains(&count), "follower count {count} off watermark");
    }
}

/// A server leaves: its slots are repaired onto the survivors, by follower
/// promotion where one exists, and the cluster settles at three leader and
/// three follower slots each.
#[test]
fn test_server_leave_repaired() {
    let builder = SlotTableBuilder::new(6, 2);
    let (seed, _) = balance_to_fixpoint(builder, &["a", "b", "c"], 16);

    // the seed table still references c; the first round strips and repairs
    let builder = SlotTableBuilder::from_table(&seed, 2);
    let (table, _) = balance_to_fixpoint(builder, &["a", "b"], 16);

    assert!(table.data_node_slot("c").is_empty());
    assert_table_invariants(&table, &["a", "b"], 2);
    assert_eq!(leader_counts(&table, &["a", "b"]), vec![3, 3]);
    assert_eq!(follower_counts(&table, &["a", "b"]), vec![3, 3]);
}

/// Pre-stripping the departed server from the builder reaches the same
/// fixpoint as leaving the repair to the balancer.
#[test]
fn test_server_leave_with_caller_stripping() {
    let builder = SlotTableBuilder::new(6, 2);
    let (seed, _) = balance_to_fixpoint(builder, &["a", "b", "c"], 16);

    let mut stripped = SlotTableBuilder::from_table(&seed, 2);
    stripped.remove_data_server("c");
    let (from_stripped, _) = balance_to_fixpoint(stripped, &["a", "b"], 16);

    let repaired = SlotTableBuilder::from_table(&seed, 2);
    let (from_repair, _) = balance_to_fixpoint(repaired, &["a", "b"], 16);

    assert_eq!(
        diff_tables(&from_stripped, &from_repair).moved_slot_count(),
        0
    );
}

/// An already balanced table with matching membership: the first round is
/// a no-op.
#[test]
fn test_no_progress_returns_none() {
    let builder = SlotTableBuilder::new(6, 2);
    let (seed, _) = balance_to_fixpoint(builder, &["a", "b", "c"], 16);

    let builder = SlotTableBuilder::from_table(&seed, 2);
    let mut balancer = new_balancer(builder, members(&["a", "b", "c"]));
    assert!(balancer.balance().unwrap().is_none());
}

/// Replica factor 1 engages leader-only placement; the uneven remainder
/// lands deterministically by server-id order.
#[test]
fn test_leader_only_degenerate() {
    let builder = SlotTableBuilder::new(8, 1);
    let (table, rounds) = balance_to_fixpoint(builder, &["a", "b", "c"], 8);

    assert_eq!(rounds, 1);
    assert_table_invariants(&table, &["a", "b", "c"], 1);
    assert_eq!(leader_counts(&table, &["a", "b", "c"]), vec![3, 3, 2]);
}
