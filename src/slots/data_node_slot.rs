//! Per-server projection of a slot-table.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::slots::{NodeId, SlotId};

/// The slots a single data-server leads and the slots it follows.
///
/// A projection is always derived from a table or builder and stays
/// consistent with it; a server never holds both roles for the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataNodeSlot {
    node: NodeId,
    leaders: BTreeSet<SlotId>,
    followers: BTreeSet<SlotId>,
}

impl DataNodeSlot {
    /// Create an empty projection for a server.
    pub fn new(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            leaders: BTreeSet::new(),
            followers: BTreeSet::new(),
        }
    }

    /// The server this projection belongs to.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Consume the projection, keeping only the server id.
    pub fn into_node(self) -> NodeId {
        self.node
    }

    /// Slots this server leads, in slot-id order.
    pub fn leaders(&self) -> &BTreeSet<SlotId> {
        &self.leaders
    }

    /// Slots this server follows, in slot-id order.
    pub fn followers(&self) -> &BTreeSet<SlotId> {
        &self.followers
    }

    /// Check if this server leads the slot.
    pub fn contains_leader(&self, slot: SlotId) -> bool {
        self.leaders.contains(&slot)
    }

    /// Check if this server follows the slot.
    pub fn contains_follower(&self, slot: SlotId) -> bool {
        self.followers.contains(&slot)
    }

    /// Total number of replicas this server holds, both roles combined.
    pub fn total_slots(&self) -> usize {
        self.leaders.len() + self.followers.len()
    }

    /// Check if this server holds no role at all.
    pub fn is_empty(&self) -> bool {
        self.leaders.is_empty() && self.followers.is_empty()
    }

    pub(crate) fn add_leader(&mut self, slot: SlotId) {
        self.leaders.insert(slot);
    }

    pub(crate) fn remove_leader(&mut self, slot: SlotId) {
        self.leaders.remove(&slot);
    }

    pub(crate) fn add_follower(&mut self, slot: SlotId) {
        self.followers.insert(slot);
    }

    pub(crate) fn remove_follower(&mut self, slot: SlotId) {
        self.followers.remove(&slot);
    }
}
