//! Weighted-vote aggregation of component signals into one composite.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use navcycle_traits::{CompositeScore, Date, InstrumentId, SignalKind};

/// Threshold assumed for a signal with no configured entry.
const DEFAULT_THRESHOLD: f64 = 0.5;

/// Configuration for composite scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Weight of each component signal.
    pub weights: BTreeMap<SignalKind, f64>,
    /// Per-signal significance threshold for vote counting.
    pub thresholds: BTreeMap<SignalKind, f64>,
    /// Votes required before the composite may exceed the ceiling.
    pub min_vote_count: usize,
    /// Expected-cycle floor for the turning-point component.
    pub min_evidence_cycles: usize,
    /// Composite cap applied under the vote minimum.
    pub low_evidence_ceiling: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::from([
                (SignalKind::Spectral, 0.3),
                (SignalKind::Harmonic, 0.2),
                (SignalKind::Phase, 0.2),
                (SignalKind::TurningPoints, 0.3),
            ]),
            thresholds: BTreeMap::from([
                (SignalKind::Spectral, 0.5),
                (SignalKind::Harmonic, 0.4),
                (SignalKind::Phase, 0.5),
                (SignalKind::TurningPoints, 0.2),
            ]),
            min_vote_count: 2,
            min_evidence_cycles: 3,
            low_evidence_ceiling: 0.1,
        }
    }
}

/// Normalized component values for one instrument.
///
/// `None` marks a component whose stage was skipped; it neither votes nor
/// contributes, and the remaining weights renormalize over what is
/// present.
#[derive(Debug, Clone, Default)]
pub struct ComponentInputs {
    /// Spectral concentration, already in [0, 1].
    pub spectral: Option<f64>,
    /// Harmonic fit quality, already in [0, 1].
    pub harmonic: Option<f64>,
    /// Phase stability (coherence and persistence blend), in [0, 1].
    pub phase: Option<f64>,
    /// Number of confirmed troughs.
    pub confirmed_troughs: usize,
    /// Cycles the series could have held (length / dominant period);
    /// zero when no dominant period is available.
    pub expected_cycles: f64,
    /// Filled fraction of the prepared grid, in [0, 1].
    pub fill_fraction: f64,
}

/// Folds component signals into one guarded composite score.
///
/// The composite is a weight-renormalized average of the present
/// components, scaled by observed coverage and capped when too few
/// components clear their significance thresholds. Higher always means
/// more evidence of exploitable cyclicality.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    config: AggregatorConfig,
}

impl ScoreAggregator {
    /// Create a new aggregator with the given configuration.
    pub const fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Score one instrument from its component inputs.
    pub fn aggregate(
        &self,
        instrument_id: &InstrumentId,
        as_of: Date,
        inputs: &ComponentInputs,
    ) -> CompositeScore {
        let turning_value = self.turning_value(inputs);

        let mut weighted_sum = 0.0;
        let mut present_weight = 0.0;
        let mut raw_values: BTreeMap<SignalKind, f64> = BTreeMap::new();
        for (&kind, &weight) in &self.config.weights {
            let value = match kind {
                SignalKind::Spectral => inputs.spectral,
                SignalKind::Harmonic => inputs.harmonic,
                SignalKind::Phase => inputs.phase,
                SignalKind::TurningPoints => Some(turning_value),
            };
            if let Some(v) = value {
                let v = v.clamp(0.0, 1.0);
                weighted_sum += weight * v;
                present_weight += weight;
                raw_values.insert(kind, v);
            }
        }

        let mut vote_count = 0;
        for (&kind, &v) in &raw_values {
            let threshold = self
                .config
                .thresholds
                .get(&kind)
                .copied()
                .unwrap_or(DEFAULT_THRESHOLD);
            let votes = match kind {
                SignalKind::TurningPoints => inputs.confirmed_troughs >= 1 && v >= threshold,
                _ => v >= threshold,
            };
            if votes {
                vote_count += 1;
            }
        }

        let coverage = (1.0 - inputs.fill_fraction).clamp(0.0, 1.0);
        let mut composite_value = if present_weight > 0.0 {
            (weighted_sum / present_weight) * coverage
        } else {
            0.0
        };
        if vote_count < self.config.min_vote_count {
            composite_value = composite_value.min(self.config.low_evidence_ceiling);
        }
        composite_value = composite_value.clamp(0.0, 1.0);

        // Contributions report each component's share of the unpenalized
        // composite; coverage and the cap apply to the composite only.
        let contributions: BTreeMap<SignalKind, f64> = raw_values
            .iter()
            .map(|(&kind, &v)| {
                let weight = self.config.weights.get(&kind).copied().unwrap_or(0.0);
                (kind, weight * v / present_weight)
            })
            .collect();

        debug!(
            instrument_id = instrument_id.as_str(),
            composite_value, vote_count, "composite scored"
        );

        CompositeScore {
            instrument_id: instrument_id.clone(),
            as_of,
            composite_value,
            contributions,
            vote_count,
        }
    }

    /// Normalize confirmed-trough evidence by how many cycles the series
    /// could plausibly have held.
    fn turning_value(&self, inputs: &ComponentInputs) -> f64 {
        let floor = self.config.min_evidence_cycles as f64;
        let denom = inputs.expected_cycles.max(floor);
        if denom <= 0.0 {
            return 0.0;
        }
        (inputs.confirmed_troughs as f64 / denom).clamp(0.0, 1.0)
    }
}
