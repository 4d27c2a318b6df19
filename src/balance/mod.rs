//! Slot balancers: recompute role assignments over the current membership.
//!
//! ## Module Structure
//!
//! - [`policy`]: watermarks and per-round movement caps
//! - [`comparators`]: deterministic orderings over server ids by load
//! - [`default_balancer`]: the four-phase [`DefaultSlotBalancer`]
//! - [`leader_only`]: [`LeaderOnlyBalancer`] for replica factor 1

pub mod comparators;
pub mod default_balancer;
pub mod leader_only;
pub mod policy;

pub use default_balancer::DefaultSlotBalancer;
pub use leader_only::LeaderOnlyBalancer;
pub use policy::{BalancePolicy, NaiveBalancePolicy};

use crate::error::Result;
use crate::slots::{NodeId, SlotTable, SlotTableBuilder};

/// A single balance round over a working slot-table.
///
/// Returns a new table with a strictly greater epoch if the round changed
/// state, `None` if the table is already in balance. Implementations are
/// purely computational: no I/O, no locks, no suspension.
pub trait SlotBalancer {
    /// Run one balance round.
    fn balance(&mut self) -> Result<Option<SlotTable>>;
}

/// Choose the balancer for the builder's replica factor.
///
/// A replica factor below 2 means no followers exist to shuffle, so the
/// leader-only placement engages; otherwise the full four-phase balancer.
pub fn new_balancer<I, S>(builder: SlotTableBuilder, data_servers: I) -> Box<dyn SlotBalancer>
where
    I: IntoIterator<Item = S>,
    S: Into<NodeId>,
{
    if builder.slot_replicas() < 2 {
        Box::new(LeaderOnlyBalancer::new(builder, data_servers))
    } else {
        Box::new(DefaultSlotBalancer::new(builder, data_servers))
    }
}
