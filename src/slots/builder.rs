//! Mutable working copy of a slot-table.
//!
//! [`SlotTableBuilder`] owns a working table plus a per-server reverse index
//! (leader-slot and follower-slot sets) kept in lock-step with every
//! mutation, so load queries never rescan the table. A builder is seeded
//! from a previous [`SlotTable`] (or empty), mutated by a balancer, and
//! snapshotted with [`build`](SlotTableBuilder::build).
//!
//! Builders are not safe for concurrent mutation; the emitted table is
//! immutable and freely shareable.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{BalanceError, Result};
use crate::slots::{DataNodeSlot, NodeId, Slot, SlotId, SlotTable};

/// Mutable slot-table plus incremental per-server indices.
#[derive(Debug, Clone)]
pub struct SlotTableBuilder {
    slot_num: u16,
    slot_replicas: u16,
    epoch: u64,
    slots: Vec<Slot>,
    nodes: BTreeMap<NodeId, DataNodeSlot>,
}

impl SlotTableBuilder {
    /// Create a builder over an entirely empty table at epoch 0.
    ///
    /// # Panics
    /// Debug-only assertion checks that `slot_replicas >= 1`.
    pub fn new(slot_num: u16, slot_replicas: u16) -> Self {
        debug_assert!(slot_replicas >= 1, "a slot always has at least a leader");
        Self {
            slot_num,
            slot_replicas,
            epoch: 0,
            slots: vec![Slot::default(); slot_num as usize],
            nodes: BTreeMap::new(),
        }
    }

    /// Create a builder seeded from a previous table, carrying its epoch.
    pub fn from_table(table: &SlotTable, slot_replicas: u16) -> Self {
        debug_assert!(slot_replicas >= 1, "a slot always has at least a leader");
        let mut builder = Self {
            slot_num: table.slot_num(),
            slot_replicas,
            epoch: table.epoch(),
            slots: table.slots.clone(),
            nodes: BTreeMap::new(),
        };
        builder.rebuild_index();
        builder
    }

    /// Total number of slots.
    pub fn slot_num(&self) -> u16 {
        self.slot_num
    }

    /// Replicas per slot, leader included.
    pub fn slot_replicas(&self) -> u16 {
        self.slot_replicas
    }

    /// Current working epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Bump the epoch; called once per balance round that changed state.
    pub fn incr_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Snapshot the working table as an immutable [`SlotTable`].
    pub fn build(&self) -> SlotTable {
        SlotTable {
            epoch: self.epoch,
            slots: self.slots.clone(),
        }
    }

    /// Seed zero-count index entries for the current membership.
    ///
    /// Servers that hold no replica yet must still show up in the
    /// below-watermark queries, otherwise they could never be raised.
    pub fn init_data_servers<I, S>(&mut self, data_servers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        for node in data_servers {
            let node: NodeId = node.into();
            if !self.nodes.contains_key(&node) {
                self.nodes.insert(node.clone(), DataNodeSlot::new(node));
            }
        }
    }

    /// Strip every role a server holds and drop its index entry.
    ///
    /// Returns whether the table changed. Used to pre-clean a builder whose
    /// seed table still references a departed server.
    pub fn remove_data_server(&mut self, node: &str) -> bool {
        let mut changed = false;
        for slot in &mut self.slots {
            if slot.leader.as_deref() == Some(node) {
                slot.leader = None;
                changed = true;
            }
            if slot.followers.remove(node) {
                changed = true;
            }
        }
        self.nodes.remove(node);
        changed
    }

    /// Set the slot's leader, returning the prior leader.
    ///
    /// A follower being promoted leaves the follower set first; a displaced
    /// prior leader is demoted to follower when the replica factor leaves
    /// room for it. Replacing a leader with itself is a no-op.
    pub fn replace_leader(&mut self, slot: SlotId, new_leader: &str) -> Result<Option<NodeId>> {
        let old_leader = self.slot_ref(slot)?.leader.clone();
        if old_leader.as_deref() == Some(new_leader) {
            return Ok(old_leader);
        }

        let promoted = {
            let entry = self.slot_mut(slot)?;
            let promoted = entry.followers.remove(new_leader);
            entry.leader = Some(new_leader.to_string());
            promoted
        };
        if promoted {
            self.node_entry(new_leader).remove_follower(slot);
        }
        self.node_entry(new_leader).add_leader(slot);

        if let Some(old) = &old_leader {
            let old = old.clone();
            self.node_entry(&old).remove_leader(slot);
            let capacity = self.slot_replicas.saturating_sub(1) as usize;
            if self.slot_ref(slot)?.followers.len() < capacity {
                self.slot_mut(slot)?.followers.insert(old.clone());
                self.node_entry(&old).add_follower(slot);
            } else {
                debug!(slot, node = %old, "displaced leader dropped, follower set has no room");
            }
        }

        if self.slot_ref(slot)?.followers.contains(new_leader) {
            return Err(BalanceError::InvariantViolation(format!(
                "slot {slot} leader {new_leader} remained in its own follower set"
            )));
        }
        Ok(old_leader)
    }

    /// Add a follower to the slot.
    pub fn add_follower(&mut self, slot: SlotId, node: &str) -> Result<()> {
        let max = self.slot_replicas.saturating_sub(1);
        {
            let entry = self.slot_ref(slot)?;
            if entry.leader.as_deref() == Some(node) || entry.followers.contains(node) {
                return Err(BalanceError::DuplicateReplica {
                    slot,
                    node: node.to_string(),
                });
            }
            if entry.followers.len() >= max as usize {
                return Err(BalanceError::Overflow { slot, max });
            }
        }
        self.slot_mut(slot)?.followers.insert(node.to_string());
        self.node_entry(node).add_follower(slot);
        Ok(())
    }

    /// Remove a follower from the slot.
    pub fn remove_follower(&mut self, slot: SlotId, node: &str) -> Result<()> {
        if !self.slot_mut(slot)?.followers.remove(node) {
            return Err(BalanceError::NotFound {
                slot,
                node: node.to_string(),
            });
        }
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.remove_follower(slot);
        }
        Ok(())
    }

    /// Project the working table onto a single server.
    ///
    /// Unknown servers get an empty projection.
    pub fn data_node_slot(&self, node: &str) -> DataNodeSlot {
        self.nodes
            .get(node)
            .cloned()
            .unwrap_or_else(|| DataNodeSlot::new(node))
    }

    /// The leader of a slot, if assigned.
    pub fn leader_of(&self, slot: SlotId) -> Option<&NodeId> {
        self.slots.get(slot as usize).and_then(|s| s.leader.as_ref())
    }

    /// The followers of a slot, ordered by server id.
    pub fn followers_of(&self, slot: SlotId) -> Vec<NodeId> {
        self.slots
            .get(slot as usize)
            .map(|s| s.followers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of slots the server currently leads.
    pub fn leader_count(&self, node: &str) -> usize {
        self.nodes.get(node).map_or(0, |d| d.leaders().len())
    }

    /// Number of slots the server currently follows.
    pub fn follower_count(&self, node: &str) -> usize {
        self.nodes.get(node).map_or(0, |d| d.followers().len())
    }

    /// Every server with an index entry, in lexicographic order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Servers leading strictly more than `threshold` slots.
    pub fn data_node_slots_leader_beyond(&self, threshold: usize) -> Vec<DataNodeSlot> {
        self.nodes
            .values()
            .filter(|d| d.leaders().len() > threshold)
            .cloned()
            .collect()
    }

    /// Servers leading strictly fewer than `threshold` slots, zero-leader
    /// servers included.
    pub fn data_node_slots_leader_below(&self, threshold: usize) -> Vec<DataNodeSlot> {
        self.nodes
            .values()
            .filter(|d| d.leaders().len() < threshold)
            .cloned()
            .collect()
    }

    /// Servers following strictly more than `threshold` slots.
    pub fn data_node_slots_follower_beyond(&self, threshold: usize) -> Vec<DataNodeSlot> {
        self.nodes
            .values()
            .filter(|d| d.followers().len() > threshold)
            .cloned()
            .collect()
    }

    /// Servers following strictly fewer than `threshold` slots, zero-follower
    /// servers included.
    pub fn data_node_slots_follower_below(&self, threshold: usize) -> Vec<DataNodeSlot> {
        self.nodes
            .values()
            .filter(|d| d.followers().len() < threshold)
            .cloned()
            .collect()
    }

    fn slot_ref(&self, slot: SlotId) -> Result<&Slot> {
        self.slots.get(slot as usize).ok_or_else(|| {
            BalanceError::InvariantViolation(format!(
                "slot id {slot} out of range, slot_num={}",
                self.slot_num
            ))
        })
    }

    fn slot_mut(&mut self, slot: SlotId) -> Result<&mut Slot> {
        let slot_num = self.slot_num;
        self.slots.get_mut(slot as usize).ok_or_else(|| {
            BalanceError::InvariantViolation(format!(
                "slot id {slot} out of range, slot_num={slot_num}"
            ))
        })
    }

    fn node_entry(&mut self, node: &str) -> &mut DataNodeSlot {
        self.nodes
            .entry(node.to_string())
            .or_insert_with(|| DataNodeSlot::new(node))
    }

    fn rebuild_index(&mut self) {
        let mut nodes: BTreeMap<NodeId, DataNodeSlot> = BTreeMap::new();
        for (id, slot) in self.slots.iter().enumerate() {
            let id = id as SlotId;
            if let Some(leader) = &slot.leader {
                nodes
                    .entry(leader.clone())
                    .or_insert_with(|| DataNodeSlot::new(leader.clone()))
                    .add_leader(id);
            }
            for follower in &slot.followers {
                nodes
                    .entry(follower.clone())
                    .or_insert_with(|| DataNodeSlot::new(follower.clone()))
                    .add_follower(id);
            }
        }
        self.nodes = nodes;
    }
}
