//! Slot-table balancer for a sharded service-registry cluster.
//!
//! The cluster partitions its namespace into a fixed number of slots, each
//! replicated across data-servers with exactly one leader. When membership
//! changes or load drifts, a controller seeds a [`SlotTableBuilder`] from
//! the previous [`SlotTable`] and runs a balance round against the current
//! membership:
//!
//! ```
//! use registry_balancer::{SlotBalancer, SlotTableBuilder, new_balancer};
//!
//! let builder = SlotTableBuilder::new(16, 2);
//! let mut balancer = new_balancer(builder, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
//!
//! while let Some(table) = balancer.balance().expect("live membership") {
//!     // publish the new table; its epoch is strictly greater than the last
//!     assert!(table.epoch() > 0);
//! }
//! ```
//!
//! Each round applies at most one balancing phase and a bounded number of
//! role changes, so repeated rounds converge without thrashing. Given
//! identical input, rounds are fully deterministic.

pub mod balance;
pub mod error;
pub mod metrics;
pub mod slots;

pub use balance::{
    BalancePolicy, DefaultSlotBalancer, LeaderOnlyBalancer, NaiveBalancePolicy, SlotBalancer,
    new_balancer,
};
pub use error::{BalanceError, Result};
pub use metrics::BalancerMetrics;
pub use slots::{
    DataNodeSlot, NodeId, Slot, SlotId, SlotTable, SlotTableBuilder, TableDiff, diff_tables,
};
