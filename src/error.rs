//! Error types for slot-table mutations and balancing.
//!
//! Defines custom error types with classification helpers so callers can
//! distinguish "the round must be abandoned" from "the caller misused the
//! mutation API".

use thiserror::Error;

use crate::slots::{NodeId, SlotId};

/// Error type for builder mutations and balance rounds
#[derive(Error, Debug)]
pub enum BalanceError {
    /// The current membership is empty; nothing can own a slot
    #[error("no available data-servers for slot-table reassignment")]
    NoDataServers,

    /// An internal postcondition failed; the round must be abandoned
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The server already holds a replica (leader or follower) of the slot
    #[error("data-server {node} already holds a replica of slot {slot}")]
    DuplicateReplica { slot: SlotId, node: NodeId },

    /// Adding another follower would exceed the replica factor
    #[error("slot {slot} already has the maximum of {max} followers")]
    Overflow { slot: SlotId, max: u16 },

    /// The server is not a follower of the slot
    #[error("data-server {node} is not a follower of slot {slot}")]
    NotFound { slot: SlotId, node: NodeId },
}

impl BalanceError {
    /// Check if this error indicates a broken internal postcondition.
    ///
    /// Callers should log these loudly and retain the prior slot-table;
    /// the working copy is no longer trustworthy.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, BalanceError::InvariantViolation(_))
    }

    /// Check if this error indicates misuse of the mutation API
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            BalanceError::DuplicateReplica { .. }
                | BalanceError::Overflow { .. }
                | BalanceError::NotFound { .. }
        )
    }
}

/// Result type alias for builder and balancer operations
pub type Result<T> = std::result::Result<T, BalanceError>;
