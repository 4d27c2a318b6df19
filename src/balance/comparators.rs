//! Deterministic total orderings over server ids by leader/follower load.
//!
//! Every ordering tie-breaks on the lexicographic server id, so a sort fed
//! by any of them is a total order and repeated runs on identical input
//! produce identical output.

use std::cmp::Ordering;

use crate::slots::{NodeId, SlotTableBuilder};

/// Descending leader count, then ascending server id.
pub fn most_leaders_first(
    builder: &SlotTableBuilder,
) -> impl Fn(&NodeId, &NodeId) -> Ordering + '_ {
    move |a, b| {
        builder
            .leader_count(b)
            .cmp(&builder.leader_count(a))
            .then_with(|| a.cmp(b))
    }
}

/// Ascending leader count, then ascending server id.
pub fn least_leaders_first(
    builder: &SlotTableBuilder,
) -> impl Fn(&NodeId, &NodeId) -> Ordering + '_ {
    move |a, b| {
        builder
            .leader_count(a)
            .cmp(&builder.leader_count(b))
            .then_with(|| a.cmp(b))
    }
}

/// Descending follower count, then ascending server id.
pub fn most_followers_first(
    builder: &SlotTableBuilder,
) -> impl Fn(&NodeId, &NodeId) -> Ordering + '_ {
    move |a, b| {
        builder
            .follower_count(b)
            .cmp(&builder.follower_count(a))
            .then_with(|| a.cmp(b))
    }
}

/// Ascending follower count, then ascending server id.
pub fn least_followers_first(
    builder: &SlotTableBuilder,
) -> impl Fn(&NodeId, &NodeId) -> Ordering + '_ {
    move |a, b| {
        builder
            .follower_count(a)
            .cmp(&builder.follower_count(b))
            .then_with(|| a.cmp(b))
    }
}
