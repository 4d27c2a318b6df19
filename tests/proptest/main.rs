// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for the slot balancer.
//!
//! Uses proptest to generate random cluster shapes and verify the universal
//! placement invariants after iterating balance rounds to a fixpoint.

use std::collections::BTreeSet;

use proptest::collection::btree_set;
use proptest::prelude::*;

use registry_balancer::{NodeId, SlotBalancer, SlotTable, SlotTableBuilder, new_balancer};

/// Strategy for slot counts worth exercising.
fn slot_nums() -> impl Strategy<Value = u16> {
    1u16..=32
}

/// Strategy for replica factors, leader included.
fn replica_factors() -> impl Strategy<Value = u16> {
    1u16..=3
}

/// Strategy for memberships of one to five distinct server ids.
fn memberships() -> impl Strategy<Value = BTreeSet<NodeId>> {
    btree_set("[a-e][0-9]", 1..=5)
}

/// Iterate rounds to a fixpoint, checking the epoch climbs by one per round.
fn fixpoint(builder: SlotTableBuilder, servers: &BTreeSet<NodeId>) -> SlotTable {
    let mut latest = builder.build();
    let mut balancer = new_balancer(builder, servers.iter().cloned());
    let mut rounds = 0usize;
    while let Some(table) = balancer.balance().expect("live membership") {
        assert_eq!(table.epoch(), latest.epoch() + 1);
        latest = table;
        rounds += 1;
        assert!(rounds <= 512, "no fixpoint within 512 rounds");
    }
    latest
}

fn check_placement(table: &SlotTable, servers: &BTreeSet<NodeId>, slot_replicas: u16) {
    let expected_followers = (slot_replicas as usize - 1).min(servers.len() - 1);
    for (id, slot) in table.iter() {
        let leader = slot
            .leader()
            .unwrap_or_else(|| panic!("slot {id} has no leader"));
        assert!(servers.contains(leader), "slot {id} led by stranger");
        assert!(
            !slot.followers().contains(leader),
            "slot {id} leader doubles as follower"
        );
        assert_eq!(slot.followers().len(), expected_followers);
        for follower in slot.followers() {
            assert!(servers.contains(follower), "slot {id} followed by stranger");
        }
    }
}

proptest! {
    /// Property: bootstrapping any cluster shape reaches a placement where
    /// every slot is led by a live server, fully replicated, and never
    /// colocated.
    #[test]
    fn prop_bootstrap_satisfies_placement_invariants(
        slot_num in slot_nums(),
        slot_replicas in replica_factors(),
        servers in memberships(),
    ) {
        let builder = SlotTableBuilder::new(slot_num, slot_replicas);
        let table = fixpoint(builder, &servers);
        check_placement(&table, &servers, slot_replicas);
    }

    /// Property: identical input yields byte-identical output.
    #[test]
    fn prop_rounds_are_deterministic(
        slot_num in slot_nums(),
        slot_replicas in replica_factors(),
        servers in memberships(),
    ) {
        let run = || {
            let builder = SlotTableBuilder::new(slot_num, slot_replicas);
            serde_json::to_string(&fixpoint(builder, &servers)).expect("serializable")
        };
        prop_assert_eq!(run(), run());
    }

    /// Property: a membership change never strands a slot on a departed
    /// server once rebalanced.
    #[test]
    fn prop_leave_strips_departed_server(
        slot_num in slot_nums(),
        slot_replicas in replica_factors(),
        servers in btree_set("[a-e][0-9]", 2..=5),
    ) {
        let builder = SlotTableBuilder::new(slot_num, slot_replicas);
        let seed = fixpoint(builder, &servers);

        let departed = servers.iter().next().expect("non-empty").clone();
        let mut survivors = servers.clone();
        survivors.remove(&departed);

        let builder = SlotTableBuilder::from_table(&seed, slot_replicas);
        let table = fixpoint(builder, &survivors);

        check_placement(&table, &survivors, slot_replicas);
        prop_assert!(table.data_node_slot(&departed).is_empty());
    }

    /// Property: once a fixpoint is reached, re-running over the same
    /// membership is a no-op.
    #[test]
    fn prop_fixpoint_is_stable(
        slot_num in slot_nums(),
        slot_replicas in replica_factors(),
        servers in memberships(),
    ) {
        let builder = SlotTableBuilder::new(slot_num, slot_replicas);
        let seed = fixpoint(builder, &servers);

        let builder = SlotTableBuilder::from_table(&seed, slot_replicas);
        let mut balancer = new_balancer(builder, servers.iter().cloned());
        prop_assert!(balancer.balance().expect("live membership").is_none());
    }
}
