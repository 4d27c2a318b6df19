//! Prometheus counters for balance rounds.
//!
//! The balancer itself performs no I/O; callers that already serve a
//! `/metrics` endpoint can register a [`BalancerMetrics`] and expose the
//! encoded text from there.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for per-round outcome counters
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RoundLabels {
    pub phase: String,
    pub outcome: String,
}

impl EncodeLabelSet for RoundLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-phase move counters
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared counters for the balancer
pub struct BalancerMetrics {
    /// Balance rounds by resolving phase and outcome
    pub rounds_total: Family<RoundLabels, Counter>,
    /// Role changes applied, by phase
    pub slot_moves_total: Family<PhaseLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerMetrics {
    /// Create a metrics instance with registered counter families
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let rounds_total = Family::<RoundLabels, Counter>::default();
        registry.register(
            "slot_balance_rounds",
            "Total number of balance rounds by phase and outcome",
            rounds_total.clone(),
        );

        let slot_moves_total = Family::<PhaseLabels, Counter>::default();
        registry.register(
            "slot_balance_moves",
            "Total number of slot role changes by phase",
            slot_moves_total.clone(),
        );

        Self {
            rounds_total,
            slot_moves_total,
            registry,
        }
    }

    /// Record a finished round
    pub fn record_round(&self, phase: &str, outcome: &str) {
        let labels = RoundLabels {
            phase: phase.to_string(),
            outcome: outcome.to_string(),
        };
        self.rounds_total.get_or_create(&labels).inc();
    }

    /// Record role changes applied by a phase
    pub fn record_moves(&self, phase: &str, count: u64) {
        let labels = PhaseLabels {
            phase: phase.to_string(),
        };
        self.slot_moves_total.get_or_create(&labels).inc_by(count);
    }

    /// Encode counters to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}
