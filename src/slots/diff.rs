//! Change reports between two slot-table epochs.
//!
//! Computes what changed, not how to apply it: the caller drives data
//! migration and role handoff from the report. Also the measuring stick for
//! the per-round movement bounds.

use crate::slots::{NodeId, SlotId, SlotTable};

/// Role changes for a single slot between two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDiff {
    /// The slot that changed.
    pub slot: SlotId,
    /// Leader in the previous table (None if unassigned).
    pub prev_leader: Option<NodeId>,
    /// Leader in the next table (None if unassigned).
    pub next_leader: Option<NodeId>,
    /// Followers present only in the next table, ordered by server id.
    pub followers_added: Vec<NodeId>,
    /// Followers present only in the previous table, ordered by server id.
    pub followers_removed: Vec<NodeId>,
}

impl SlotDiff {
    /// Check if the slot's leader changed.
    pub fn leader_moved(&self) -> bool {
        self.prev_leader != self.next_leader
    }
}

/// Complete change report between two tables.
#[derive(Debug, Clone, Default)]
pub struct TableDiff {
    /// One entry per slot whose `(leader, followers)` tuple differs.
    pub changed: Vec<SlotDiff>,
}

impl TableDiff {
    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Number of slots whose assignment differs.
    pub fn moved_slot_count(&self) -> usize {
        self.changed.len()
    }

    /// Number of slots whose leader differs.
    pub fn leader_moves(&self) -> usize {
        self.changed.iter().filter(|d| d.leader_moved()).count()
    }

    /// Total follower role changes, additions and removals combined.
    pub fn follower_moves(&self) -> usize {
        self.changed
            .iter()
            .map(|d| d.followers_added.len() + d.followers_removed.len())
            .sum()
    }
}

/// Compute the per-slot changes from `prev` to `next`.
///
/// Both tables must cover the same slot range; a table never changes its
/// slot count over the life of a cluster.
pub fn diff_tables(prev: &SlotTable, next: &SlotTable) -> TableDiff {
    debug_assert_eq!(
        prev.slot_num(),
        next.slot_num(),
        "slot count is fixed for the life of a cluster"
    );

    let mut changed = Vec::new();
    for (id, prev_slot) in prev.iter() {
        let Some(next_slot) = next.slot(id) else {
            continue;
        };
        if prev_slot == next_slot {
            continue;
        }
        changed.push(SlotDiff {
            slot: id,
            prev_leader: prev_slot.leader().cloned(),
            next_leader: next_slot.leader().cloned(),
            followers_added: next_slot
                .followers()
                .difference(prev_slot.followers())
                .cloned()
                .collect(),
            followers_removed: prev_slot
                .followers()
                .difference(next_slot.followers())
                .cloned()
                .collect(),
        });
    }
    TableDiff { changed }
}
