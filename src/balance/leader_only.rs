//! Degenerate balancer for replica factor 1.
//!
//! With a single replica per slot there are no followers to shuffle, so the
//! whole problem collapses to spreading leaders evenly. The greedy pass here
//! is unbounded: every round ends with every slot led by a live server and
//! no server above the ceiling average.

use std::collections::BTreeSet;

use tracing::{debug, error, info};

use crate::balance::{SlotBalancer, comparators};
use crate::error::{BalanceError, Result};
use crate::slots::{NodeId, SlotTable, SlotTableBuilder};

/// Leader-only placement over the current membership.
pub struct LeaderOnlyBalancer {
    builder: SlotTableBuilder,
    data_servers: BTreeSet<NodeId>,
}

impl LeaderOnlyBalancer {
    /// Create a balancer over the builder and the current membership.
    pub fn new<I, S>(mut builder: SlotTableBuilder, data_servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let data_servers: BTreeSet<NodeId> =
            data_servers.into_iter().map(Into::into).collect();
        builder.init_data_servers(data_servers.iter().cloned());
        Self {
            builder,
            data_servers,
        }
    }

    /// Hand the working copy back to the caller.
    pub fn into_builder(self) -> SlotTableBuilder {
        self.builder
    }

    /// Give every unled or stale-led slot a leader, and drop followers the
    /// replica factor does not admit.
    fn assign_leaders(&mut self) -> Result<usize> {
        let mut moved = 0;

        for slot in 0..self.builder.slot_num() {
            for follower in self.builder.followers_of(slot) {
                self.builder.remove_follower(slot, &follower)?;
                info!(slot, node = %follower, "dropped follower, replica factor admits none");
                moved += 1;
            }
        }

        for slot in 0..self.builder.slot_num() {
            let stale = match self.builder.leader_of(slot) {
                None => true,
                Some(leader) => !self.data_servers.contains(leader),
            };
            if !stale {
                continue;
            }
            let Some(target) = self.least_loaded(None) else {
                break;
            };
            let prior = self.builder.replace_leader(slot, &target)?;
            info!(slot, from = ?prior, to = %target, "assigned slot leader");
            moved += 1;
        }
        Ok(moved)
    }

    /// Move leaders off any server above the ceiling average until none is.
    fn spread_leaders(&mut self) -> Result<usize> {
        let ceil = (self.builder.slot_num() as usize).div_ceil(self.data_servers.len());
        let mut moved = 0;
        loop {
            let Some(hot) = self.most_loaded_beyond(ceil) else {
                break;
            };
            let Some(cold) = self.least_loaded(Some(&hot)) else {
                break;
            };
            let Some(slot) = self
                .builder
                .data_node_slot(&hot)
                .leaders()
                .iter()
                .next()
                .copied()
            else {
                break;
            };
            self.builder.replace_leader(slot, &cold)?;
            info!(slot, from = %hot, to = %cold, "moved leader off overloaded data-server");
            moved += 1;
        }
        Ok(moved)
    }

    fn most_loaded_beyond(&self, ceil: usize) -> Option<NodeId> {
        let cmp = comparators::most_leaders_first(&self.builder);
        self.data_servers
            .iter()
            .min_by(|a, b| cmp(a, b))
            .filter(|node| self.builder.leader_count(node) > ceil)
            .cloned()
    }

    fn least_loaded(&self, exclude: Option<&NodeId>) -> Option<NodeId> {
        let cmp = comparators::least_leaders_first(&self.builder);
        self.data_servers
            .iter()
            .filter(|node| Some(*node) != exclude)
            .min_by(|a, b| cmp(a, b))
            .cloned()
    }
}

impl SlotBalancer for LeaderOnlyBalancer {
    fn balance(&mut self) -> Result<Option<SlotTable>> {
        if self.data_servers.is_empty() {
            error!("no available data-servers, aborting leader-only balance");
            return Err(BalanceError::NoDataServers);
        }
        let moved = self.assign_leaders()? + self.spread_leaders()?;
        if moved == 0 {
            debug!("leader-only balance made no changes");
            return Ok(None);
        }
        self.builder.incr_epoch();
        Ok(Some(self.builder.build()))
    }
}
