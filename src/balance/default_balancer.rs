//! The default slot balancer.
//!
//! Runs exactly one phase per round, in fixed priority order, and stops at
//! the first phase that changes state:
//!
//! 0. repair: strip departed servers, re-lead orphaned slots, restore the
//!    replica factor (uncapped; correctness outranks the anti-thrash caps)
//! 1. leader hotspots: promote a follower out of a leader-hot server, or
//!    relocate a follower to open such a promotion path
//! 2. follower hotspots: relocate followers off follower-hot servers
//! 3. follower cold spots: relocate followers onto follower-cold servers
//! 4. leader cold spots: downgrade a loaded leader in favor of a cold one
//!
//! Leader imbalance harms request routing the most, and raising a cold
//! follower is cheaper than raising a cold leader (which forces a handoff),
//! hence the ordering. Returning after the first changed phase keeps each
//! round's change-set small, so a drifted cluster converges across repeated
//! rounds instead of thrashing in one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::balance::policy::{BalancePolicy, NaiveBalancePolicy};
use crate::balance::{SlotBalancer, comparators};
use crate::error::{BalanceError, Result};
use crate::metrics::BalancerMetrics;
use crate::slots::{DataNodeSlot, NodeId, SlotId, SlotTable, SlotTableBuilder};

/// Four-phase balancer over a working slot-table and the current membership.
pub struct DefaultSlotBalancer<P = NaiveBalancePolicy> {
    builder: SlotTableBuilder,
    data_servers: BTreeSet<NodeId>,
    policy: P,
    metrics: Option<Arc<BalancerMetrics>>,
}

impl DefaultSlotBalancer<NaiveBalancePolicy> {
    /// Create a balancer with the default policy derived from the slot count.
    pub fn new<I, S>(builder: SlotTableBuilder, data_servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let policy = NaiveBalancePolicy::for_slot_num(builder.slot_num());
        Self::with_policy(builder, data_servers, policy)
    }
}

impl<P: BalancePolicy> DefaultSlotBalancer<P> {
    /// Create a balancer with an explicit policy.
    pub fn with_policy<I, S>(mut builder: SlotTableBuilder, data_servers: I, policy: P) -> Self
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
            policy,
            metrics: None,
        }
    }

    /// Record per-round counters into the given registry.
    pub fn with_metrics(mut self, metrics: Arc<BalancerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Hand the working copy back to the caller.
    pub fn into_builder(self) -> SlotTableBuilder {
        self.builder
    }

    fn server_count(&self) -> usize {
        self.data_servers.len()
    }

    fn leader_ceil(&self) -> usize {
        (self.builder.slot_num() as usize).div_ceil(self.server_count())
    }

    fn leader_floor(&self) -> usize {
        self.builder.slot_num() as usize / self.server_count()
    }

    fn follower_ceil(&self) -> usize {
        let total =
            self.builder.slot_num() as usize * (self.builder.slot_replicas() as usize - 1);
        total.div_ceil(self.server_count())
    }

    fn follower_floor(&self) -> usize {
        let total =
            self.builder.slot_num() as usize * (self.builder.slot_replicas() as usize - 1);
        total / self.server_count()
    }

    /// Followers a slot should carry given the replica factor and membership.
    fn follower_target(&self) -> usize {
        (self.builder.slot_replicas() as usize - 1).min(self.server_count() - 1)
    }

    // ------------------------------------------------------------------
    // Phase 0: repair
    // ------------------------------------------------------------------

    /// Strip departed servers, give every orphaned slot a live leader and
    /// restore each slot's follower count to the replica factor.
    ///
    /// Uncapped: a table that references dead servers or under-replicated
    /// slots is repaired in a single round.
    fn repair_stale_slots(&mut self) -> Result<usize> {
        let mut moved = 0;

        let departed: Vec<NodeId> = self
            .builder
            .node_ids()
            .into_iter()
            .filter(|node| !self.data_servers.contains(node))
            .collect();
        for node in departed {
            if self.builder.remove_data_server(&node) {
                info!(node = %node, "stripped departed data-server from the slot table");
                moved += 1;
            }
        }

        let follower_target = self.follower_target();
        for slot in 0..self.builder.slot_num() {
            if self.builder.leader_of(slot).is_none() {
                let Some(new_leader) = self.pick_leader_for(slot) else {
                    warn!(slot, "no data-server can lead the slot");
                    continue;
                };
                self.builder.replace_leader(slot, &new_leader)?;
                info!(slot, to = %new_leader, "assigned leader to orphaned slot");
                moved += 1;
            }

            while self.builder.followers_of(slot).len() > follower_target {
                let Some(victim) = self.pick_follower_to_trim(slot) else {
                    break;
                };
                self.builder.remove_follower(slot, &victim)?;
                info!(slot, node = %victim, "trimmed follower beyond the replica factor");
                moved += 1;
            }

            while self.builder.followers_of(slot).len() < follower_target {
                let Some(new_follower) = self.pick_follower_for(slot) else {
                    warn!(slot, "no data-server left to replicate the slot onto");
                    break;
                };
                self.builder.add_follower(slot, &new_follower)?;
                info!(slot, to = %new_follower, "added follower to under-replicated slot");
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Leader for an orphaned slot: prefer promoting one of its followers,
    /// else the least-leaders member not already following it.
    fn pick_leader_for(&self, slot: SlotId) -> Option<NodeId> {
        let followers = self.builder.followers_of(slot);
        let cmp = comparators::least_leaders_first(&self.builder);
        if let Some(follower) = followers.iter().min_by(|a, b| cmp(a, b)) {
            return Some(follower.clone());
        }
        self.data_servers
            .iter()
            .filter(|node| !followers.contains(*node))
            .min_by(|a, b| cmp(a, b))
            .cloned()
    }

    fn pick_follower_to_trim(&self, slot: SlotId) -> Option<NodeId> {
        let cmp = comparators::most_followers_first(&self.builder);
        self.builder
            .followers_of(slot)
            .into_iter()
            .min_by(|a, b| cmp(a, b))
    }

    fn pick_follower_for(&self, slot: SlotId) -> Option<NodeId> {
        let leader = self.builder.leader_of(slot).cloned();
        let followers = self.builder.followers_of(slot);
        let cmp = comparators::least_followers_first(&self.builder);
        self.data_servers
            .iter()
            .filter(|node| leader.as_ref() != Some(*node) && !followers.contains(*node))
            .min_by(|a, b| cmp(a, b))
            .cloned()
    }

    // ------------------------------------------------------------------
    // Phase 1: leader hotspots
    // ------------------------------------------------------------------

    fn balance_leader_slots(&mut self) -> Result<usize> {
        let ceil_avg = self.leader_ceil();
        let moved = self.upgrade_high_leaders(ceil_avg)?;
        if moved > 0 {
            return Ok(moved);
        }
        self.migrate_high_leaders(ceil_avg)
    }

    /// Promote a follower held by a lighter server to take over a leader
    /// slot of a leader-hot server.
    fn upgrade_high_leaders(&mut self, ceil_avg: usize) -> Result<usize> {
        let max_move = self.policy.max_move_leader_slots();
        let threshold = self.policy.leader_high_water_mark(ceil_avg);
        let mut balanced = 0;
        let mut not_satisfied: BTreeSet<NodeId> = BTreeSet::new();

        while balanced < max_move {
            let high_data_servers = self.find_leader_high_water_mark(threshold);
            if high_data_servers.is_empty() {
                break;
            }
            if high_data_servers.iter().all(|n| not_satisfied.contains(n)) {
                info!(nodes = ?high_data_servers, "no follower left to upgrade for leader-hot servers");
                break;
            }
            // never hand a leader to a server that would immediately be hot
            let mut excludes: BTreeSet<NodeId> = high_data_servers.iter().cloned().collect();
            excludes.extend(self.find_leader_high_water_mark(threshold.saturating_sub(1)));
            for hot in &high_data_servers {
                if not_satisfied.contains(hot) {
                    continue;
                }
                let Some((new_leader, slot)) =
                    self.select_follower_for_leader_upgrade_out(hot, &excludes)
                else {
                    not_satisfied.insert(hot.clone());
                    continue;
                };
                self.builder.replace_leader(slot, &new_leader)?;
                info!(slot, from = %hot, to = %new_leader, "upgraded follower to leader");
                balanced += 1;
                break;
            }
        }
        Ok(balanced)
    }

    /// When no follower of a hot server's slots may be promoted, relocate
    /// one so a later round can promote it.
    fn migrate_high_leaders(&mut self, ceil_avg: usize) -> Result<usize> {
        let max_move = self.policy.max_move_follower_slots();
        let threshold = self.policy.leader_high_water_mark(ceil_avg);

        let high_data_servers = self.find_leader_high_water_mark(threshold);
        if high_data_servers.is_empty() {
            return Ok(0);
        }
        let mut excludes: BTreeSet<NodeId> = high_data_servers.iter().cloned().collect();
        excludes.extend(self.find_leader_high_water_mark(threshold.saturating_sub(1)));

        let mut balanced = 0;
        let mut moved_in: BTreeSet<NodeId> = BTreeSet::new();
        // each hot server is visited once per round so a follower moves at most once
        for hot in &high_data_servers {
            let Some((old_follower, slot, new_follower)) =
                self.select_follower_for_leader_migrate(hot, &excludes, &moved_in)
            else {
                warn!(node = %hot, "no follower can be relocated to open an upgrade path");
                continue;
            };
            self.builder.remove_follower(slot, &old_follower)?;
            self.builder.add_follower(slot, &new_follower)?;
            moved_in.insert(new_follower.clone());
            info!(slot, from = %old_follower, to = %new_follower, "relocated follower of a leader-hot server");
            balanced += 1;
            if balanced >= max_move {
                break;
            }
        }
        Ok(balanced)
    }

    // ------------------------------------------------------------------
    // Phase 2/3: follower hotspots and cold spots
    // ------------------------------------------------------------------

    fn balance_high_follower_slots(&mut self) -> Result<usize> {
        let max_move = self.policy.max_move_follower_slots();
        let threshold = self.policy.follower_high_water_mark(self.follower_ceil());
        let mut balanced = 0;

        while balanced < max_move {
            let high_data_servers = self.find_follower_high_water_mark(threshold);
            if high_data_servers.is_empty() {
                break;
            }
            let mut excludes: BTreeSet<NodeId> = high_data_servers.iter().cloned().collect();
            excludes.extend(self.find_follower_high_water_mark(threshold.saturating_sub(1)));

            let mut moved = false;
            for hot in &high_data_servers {
                let Some((new_follower, slot)) =
                    self.select_follower_for_balance_out(hot, &excludes)
                else {
                    warn!(node = %hot, "no relocation target for follower-hot server");
                    continue;
                };
                self.builder.remove_follower(slot, hot)?;
                self.builder.add_follower(slot, &new_follower)?;
                info!(slot, from = %hot, to = %new_follower, "relocated follower off hot server");
                balanced += 1;
                moved = true;
                break;
            }
            if !moved {
                // every hot server is stuck; re-scanning cannot change that
                break;
            }
        }
        Ok(balanced)
    }

    fn balance_low_follower_slots(&mut self) -> Result<usize> {
        let max_move = self.policy.max_move_follower_slots();
        let threshold = self.policy.follower_low_water_mark(self.follower_floor());
        let mut balanced = 0;

        while balanced < max_move {
            let low_data_servers = self.find_follower_low_water_mark(threshold);
            if low_data_servers.is_empty() {
                break;
            }
            // never drain a server down to the low watermark itself
            let mut excludes: BTreeSet<NodeId> = low_data_servers.iter().cloned().collect();
            excludes.extend(self.find_follower_low_water_mark(threshold + 1));

            let mut moved = false;
            for cold in &low_data_servers {
                let Some((old_follower, slot)) =
                    self.select_follower_for_balance_in(cold, &excludes)
                else {
                    warn!(node = %cold, "no follower available to move onto cold server");
                    continue;
                };
                self.builder.remove_follower(slot, &old_follower)?;
                self.builder.add_follower(slot, cold)?;
                info!(slot, from = %old_follower, to = %cold, "relocated follower onto cold server");
                balanced += 1;
                moved = true;
                break;
            }
            if !moved {
                break;
            }
        }
        Ok(balanced)
    }

    // ------------------------------------------------------------------
    // Phase 4: leader cold spots
    // ------------------------------------------------------------------

    fn balance_low_leaders(&mut self) -> Result<usize> {
        let max_move = self.policy.max_move_leader_slots();
        let threshold = self.policy.leader_low_water_mark(self.leader_floor());
        let mut balanced = 0;
        let mut not_satisfied: BTreeSet<NodeId> = BTreeSet::new();

        while balanced < max_move {
            let low_data_servers = self.find_leader_low_water_mark(threshold);
            if low_data_servers.is_empty() {
                break;
            }
            if low_data_servers.iter().all(|n| not_satisfied.contains(n)) {
                info!(nodes = ?low_data_servers, "no follower left to upgrade on leader-cold servers");
                break;
            }
            // never drain a leader from a server already at the floor
            let mut excludes: BTreeSet<NodeId> = low_data_servers.iter().cloned().collect();
            excludes.extend(self.find_leader_low_water_mark(threshold + 1));

            for cold in &low_data_servers {
                if not_satisfied.contains(cold) {
                    continue;
                }
                let Some((old_leader, slot)) =
                    self.select_follower_for_leader_upgrade_in(cold, &excludes)
                else {
                    not_satisfied.insert(cold.clone());
                    continue;
                };
                let replaced = self.builder.replace_leader(slot, cold)?;
                if replaced.as_ref() != Some(&old_leader) {
                    error!(slot, expected = %old_leader, found = ?replaced, to = %cold,
                        "conflicting leader during upgrade");
                    return Err(BalanceError::InvariantViolation(format!(
                        "conflicting leader for slot {slot}: expected {old_leader}, found {replaced:?}"
                    )));
                }
                info!(slot, from = %old_leader, to = %cold, "upgraded cold server to leader");
                balanced += 1;
                break;
            }
        }
        Ok(balanced)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Over the hot server's leader slots, find a follower outside
    /// `excludes` to promote: fewest current leaders, then smallest slot id.
    fn select_follower_for_leader_upgrade_out(
        &self,
        hot: &NodeId,
        excludes: &BTreeSet<NodeId>,
    ) -> Option<(NodeId, SlotId)> {
        let leader_slots = self.builder.data_node_slot(hot).leaders().clone();
        let mut upgrade_candidates: BTreeMap<NodeId, Vec<SlotId>> = BTreeMap::new();
        for &slot in &leader_slots {
            for follower in self.builder.followers_of(slot) {
                if excludes.contains(&follower) {
                    continue;
                }
                upgrade_candidates.entry(follower).or_default().push(slot);
            }
        }
        if upgrade_candidates.is_empty() {
            debug!(node = %hot, leaders = leader_slots.len(), "no follower eligible for upgrade");
            return None;
        }
        let mut servers: Vec<NodeId> = upgrade_candidates.keys().cloned().collect();
        servers.sort_by(comparators::least_leaders_first(&self.builder));
        let selected = servers.first()?;
        let slot = *upgrade_candidates.get(selected)?.first()?;
        Some((selected.clone(), slot))
    }

    /// Over the hot server's leader slots, find a follower to relocate:
    /// donors sorted most-followers-first, receivers least-leaders-first.
    fn select_follower_for_leader_migrate(
        &self,
        hot: &NodeId,
        excludes: &BTreeSet<NodeId>,
        moved_in: &BTreeSet<NodeId>,
    ) -> Option<(NodeId, SlotId, NodeId)> {
        let leader_slots = self.builder.data_node_slot(hot).leaders().clone();
        let mut movable: BTreeMap<NodeId, Vec<SlotId>> = BTreeMap::new();
        for &slot in &leader_slots {
            for follower in self.builder.followers_of(slot) {
                if moved_in.contains(&follower) {
                    // just received a follower this round, not a donor
                    continue;
                }
                movable.entry(follower).or_default().push(slot);
            }
        }
        let mut donors: Vec<NodeId> = movable.keys().cloned().collect();
        donors.sort_by(comparators::most_followers_first(&self.builder));
        for donor in &donors {
            let Some(slots) = movable.get(donor) else {
                continue;
            };
            for &slot in slots {
                let receivers = self
                    .candidates_sorted(excludes, comparators::least_leaders_first(&self.builder));
                for receiver in receivers {
                    if &receiver == donor {
                        continue;
                    }
                    if self.builder.data_node_slot(&receiver).contains_follower(slot) {
                        debug!(slot, donor = %donor, receiver = %receiver,
                            "receiver already follows the slot");
                        continue;
                    }
                    return Some((donor.clone(), slot, receiver));
                }
            }
        }
        None
    }

    /// A slot the hot server follows that some lighter server can take over.
    fn select_follower_for_balance_out(
        &self,
        hot: &NodeId,
        excludes: &BTreeSet<NodeId>,
    ) -> Option<(NodeId, SlotId)> {
        let follower_slots = self.builder.data_node_slot(hot).followers().clone();
        let candidates =
            self.candidates_sorted(excludes, comparators::least_followers_first(&self.builder));
        for &slot in &follower_slots {
            for candidate in &candidates {
                let projection = self.builder.data_node_slot(candidate);
                if projection.contains_leader(slot) {
                    debug!(slot, node = %candidate, "candidate already leads the slot");
                    continue;
                }
                if projection.contains_follower(slot) {
                    debug!(slot, node = %candidate, "candidate already follows the slot");
                    continue;
                }
                return Some((candidate.clone(), slot));
            }
        }
        None
    }

    /// A follower slot on some loaded donor that the cold server could take.
    fn select_follower_for_balance_in(
        &self,
        cold: &NodeId,
        excludes: &BTreeSet<NodeId>,
    ) -> Option<(NodeId, SlotId)> {
        let cold_projection = self.builder.data_node_slot(cold);
        let donors =
            self.candidates_sorted(excludes, comparators::most_followers_first(&self.builder));
        for donor in donors {
            let donor_projection = self.builder.data_node_slot(&donor);
            for &slot in donor_projection.followers() {
                if cold_projection.contains_follower(slot) {
                    debug!(slot, node = %cold, "cold server already follows the slot");
                    continue;
                }
                if cold_projection.contains_leader(slot) {
                    debug!(slot, node = %cold, "cold server already leads the slot");
                    continue;
                }
                return Some((donor, slot));
            }
        }
        None
    }

    /// Over the cold server's follower slots, find the leader to downgrade:
    /// most current leaders, then smallest slot id.
    fn select_follower_for_leader_upgrade_in(
        &self,
        cold: &NodeId,
        excludes: &BTreeSet<NodeId>,
    ) -> Option<(NodeId, SlotId)> {
        let follower_slots = self.builder.data_node_slot(cold).followers().clone();
        let mut downgrade_candidates: BTreeMap<NodeId, Vec<SlotId>> = BTreeMap::new();
        for &slot in &follower_slots {
            let Some(leader) = self.builder.leader_of(slot) else {
                error!(slot, node = %cold, "followed slot has no leader");
                continue;
            };
            if excludes.contains(leader) {
                debug!(slot, leader = %leader, "leader cannot give up a slot");
                continue;
            }
            downgrade_candidates
                .entry(leader.clone())
                .or_default()
                .push(slot);
        }
        if downgrade_candidates.is_empty() {
            debug!(node = %cold, followers = follower_slots.len(),
                "no leader can be downgraded for cold server");
            return None;
        }
        let mut servers: Vec<NodeId> = downgrade_candidates.keys().cloned().collect();
        servers.sort_by(comparators::most_leaders_first(&self.builder));
        let selected = servers.first()?;
        let slot = *downgrade_candidates.get(selected)?.first()?;
        Some((selected.clone(), slot))
    }

    // ------------------------------------------------------------------
    // Watermark scans
    // ------------------------------------------------------------------

    fn find_leader_high_water_mark(&self, threshold: usize) -> Vec<NodeId> {
        let mut nodes = self.members_only(self.builder.data_node_slots_leader_beyond(threshold));
        nodes.sort_by(comparators::most_leaders_first(&self.builder));
        debug!(threshold, nodes = ?nodes, "leader high watermark scan");
        nodes
    }

    fn find_leader_low_water_mark(&self, threshold: usize) -> Vec<NodeId> {
        let mut nodes = self.members_only(self.builder.data_node_slots_leader_below(threshold));
        nodes.sort_by(comparators::least_leaders_first(&self.builder));
        debug!(threshold, nodes = ?nodes, "leader low watermark scan");
        nodes
    }

    fn find_follower_high_water_mark(&self, threshold: usize) -> Vec<NodeId> {
        let mut nodes = self.members_only(self.builder.data_node_slots_follower_beyond(threshold));
        nodes.sort_by(comparators::most_followers_first(&self.builder));
        debug!(threshold, nodes = ?nodes, "follower high watermark scan");
        nodes
    }

    fn find_follower_low_water_mark(&self, threshold: usize) -> Vec<NodeId> {
        let mut nodes = self.members_only(self.builder.data_node_slots_follower_below(threshold));
        nodes.sort_by(comparators::least_followers_first(&self.builder));
        debug!(threshold, nodes = ?nodes, "follower low watermark scan");
        nodes
    }

    fn members_only(&self, projections: Vec<DataNodeSlot>) -> Vec<NodeId> {
        projections
            .into_iter()
            .map(DataNodeSlot::into_node)
            .filter(|node| self.data_servers.contains(node))
            .collect()
    }

    fn candidates_sorted<F>(&self, excludes: &BTreeSet<NodeId>, cmp: F) -> Vec<NodeId>
    where
        F: Fn(&NodeId, &NodeId) -> Ordering,
    {
        let mut candidates: Vec<NodeId> = self
            .data_servers
            .iter()
            .filter(|node| !excludes.contains(*node))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| cmp(a, b));
        candidates
    }
}

impl<P: BalancePolicy> SlotBalancer for DefaultSlotBalancer<P> {
    fn balance(&mut self) -> Result<Option<SlotTable>> {
        if self.data_servers.is_empty() {
            error!("no available data-servers, aborting balance round");
            return Err(BalanceError::NoDataServers);
        }

        let phases: [(&'static str, fn(&mut Self) -> Result<usize>); 5] = [
            ("repair", Self::repair_stale_slots),
            ("balance_leader_slots", Self::balance_leader_slots),
            (
                "balance_high_follower_slots",
                Self::balance_high_follower_slots,
            ),
            (
                "balance_low_follower_slots",
                Self::balance_low_follower_slots,
            ),
            ("balance_low_leaders", Self::balance_low_leaders),
        ];
        for (phase, run) in phases {
            let moved = run(self)?;
            if moved > 0 {
                info!(phase, moved, "balance round applied changes");
                if let Some(metrics) = &self.metrics {
                    metrics.record_round(phase, "changed");
                    metrics.record_moves(phase, moved as u64);
                }
                self.builder.incr_epoch();
                return Ok(Some(self.builder.build()));
            }
        }

        debug!("balance round made no changes");
        if let Some(metrics) = &self.metrics {
            metrics.record_round("none", "no_change");
        }
        Ok(None)
    }
}
