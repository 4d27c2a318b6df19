//! Immutable slot-table snapshots.
//!
//! A [`SlotTable`] records, for every slot, the leader data-server and the
//! ordered follower set, together with a monotonic epoch. Tables are emitted
//! by [`SlotTableBuilder`](crate::slots::SlotTableBuilder) and are immutable
//! and freely shareable afterwards; serialization is left to the caller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::slots::DataNodeSlot;

/// A logical partition of the namespace, identified by an integer in
/// `[0, slot_num)`.
pub type SlotId = u16;

/// Opaque identifier of a data-server, in practice an IP or host name.
///
/// Equality is by string identity; the lexicographic order over ids seeds
/// every tie-break in the balancer.
pub type NodeId = String;

/// Role assignment for a single slot: at most one leader plus an ordered
/// follower set that never contains the leader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub(crate) leader: Option<NodeId>,
    pub(crate) followers: BTreeSet<NodeId>,
}

impl Slot {
    /// Get the leader, if the slot has one.
    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    /// Get the follower set, ordered by server id.
    pub fn followers(&self) -> &BTreeSet<NodeId> {
        &self.followers
    }

    /// Check if the server holds any role for this slot.
    pub fn references(&self, node: &str) -> bool {
        self.leader.as_deref() == Some(node) || self.followers.contains(node)
    }
}

/// Immutable snapshot of the complete role assignment for every slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTable {
    pub(crate) epoch: u64,
    pub(crate) slots: Vec<Slot>,
}

impl SlotTable {
    /// Create an empty table at epoch 0: every slot unled, no followers.
    pub fn empty(slot_num: u16) -> Self {
        Self {
            epoch: 0,
            slots: vec![Slot::default(); slot_num as usize],
        }
    }

    /// Monotonic version number; a replacement table always carries a
    /// strictly greater epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total number of slots, fixed for the life of a cluster.
    pub fn slot_num(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Get a single slot's assignment.
    pub fn slot(&self, slot: SlotId) -> Option<&Slot> {
        self.slots.get(slot as usize)
    }

    /// Get the leader of a slot.
    pub fn leader_of(&self, slot: SlotId) -> Option<&NodeId> {
        self.slot(slot).and_then(Slot::leader)
    }

    /// Iterate over `(slot id, assignment)` pairs in slot-id order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(id, slot)| (id as SlotId, slot))
    }

    /// Every data-server referenced by the table, in lexicographic order.
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        let mut nodes = BTreeSet::new();
        for slot in &self.slots {
            if let Some(leader) = slot.leader() {
                nodes.insert(leader.clone());
            }
            for follower in slot.followers() {
                nodes.insert(follower.clone());
            }
        }
        nodes
    }

    /// Project the table onto a single data-server: the slots it leads and
    /// the slots it follows.
    pub fn data_node_slot(&self, node: &str) -> DataNodeSlot {
        let mut projection = DataNodeSlot::new(node);
        for (id, slot) in self.iter() {
            if slot.leader.as_deref() == Some(node) {
                projection.add_leader(id);
            } else if slot.followers.contains(node) {
                projection.add_follower(id);
            }
        }
        projection
    }
}
