//! Guardrailed confirmation of cycle turning points.

use serde::{Deserialize, Serialize};
use tracing::debug;

use navcycle_traits::{
    CycleLabel, Evidence, PreparedSeries, TurningPoint, TurningPointKind,
};

/// Fewest finite trailing points required for a usable z-score baseline.
const MIN_BASELINE_POINTS: usize = 10;

/// Configuration for turning-point confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurningConfig {
    /// Z-score a trough candidate must breach; negative. Peaks mirror it.
    pub zscore_threshold: f64,
    /// Grid steps after the candidate over which the rebound is checked.
    pub confirmation_lag: usize,
    /// Minimum grid steps between accepted points of the same kind.
    pub min_spacing: usize,
    /// Trailing window (grid steps) for the z-score baseline.
    pub trailing_window: usize,
}

impl Default for TurningConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: -1.5,
            confirmation_lag: 10,
            min_spacing: 20,
            trailing_window: 63,
        }
    }
}

/// Confirms or rejects the extrema candidates the phase tracker labeled.
///
/// A trough candidate survives only when all three guardrails hold: its
/// residual z-score versus the trailing baseline breaches the threshold,
/// the residual moves back up over the confirmation lag, and it keeps the
/// minimum spacing from the previously accepted trough. Peaks mirror the
/// rules. Rejected candidates are discarded without record.
#[derive(Debug, Clone)]
pub struct TurningPointDetector {
    config: TurningConfig,
}

impl TurningPointDetector {
    /// Create a new detector with the given configuration.
    pub const fn new(config: TurningConfig) -> Self {
        Self { config }
    }

    /// Confirm turning points over one instrument's residual.
    ///
    /// `labels` supplies the candidates (Trough/Peak entries) and must be
    /// aligned with `residual` and the prepared grid.
    pub fn detect(
        &self,
        series: &PreparedSeries,
        residual: &[f64],
        labels: &[CycleLabel],
    ) -> Vec<TurningPoint> {
        let n = residual.len().min(labels.len()).min(series.dates.len());
        let mut points = Vec::new();
        let mut last_trough: Option<usize> = None;
        let mut last_peak: Option<usize> = None;

        for i in 0..n {
            let kind = match labels[i] {
                CycleLabel::Trough => TurningPointKind::Trough,
                CycleLabel::Peak => TurningPointKind::Peak,
                _ => continue,
            };
            let value = residual[i];
            if !value.is_finite() {
                continue;
            }

            // Guardrail (c): spacing against the last accepted same-kind
            // point, checked first so rejected candidates never reset it.
            let last = match kind {
                TurningPointKind::Trough => &mut last_trough,
                TurningPointKind::Peak => &mut last_peak,
            };
            if let Some(prev) = *last {
                if i - prev < self.config.min_spacing {
                    continue;
                }
            }

            // Guardrail (a): depth against the trailing baseline.
            let lo = i.saturating_sub(self.config.trailing_window);
            let baseline: Vec<f64> = residual[lo..i]
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            if baseline.len() < MIN_BASELINE_POINTS {
                continue;
            }
            let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
            let std = (baseline.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                / (baseline.len() - 1) as f64)
                .sqrt();
            if std < 1e-10 {
                continue;
            }
            let z = (value - mean) / std;
            let threshold = self.config.zscore_threshold;
            let deep_enough = match kind {
                TurningPointKind::Trough => z <= threshold,
                TurningPointKind::Peak => z >= -threshold,
            };
            if !deep_enough {
                continue;
            }

            // Guardrail (b): the residual must move back over the lag; a
            // candidate without a full confirmation window is rejected.
            let j = i + self.config.confirmation_lag;
            if j >= n {
                continue;
            }
            let after = residual[j];
            if !after.is_finite() {
                continue;
            }
            let movement = after - value;
            let rebounds = match kind {
                TurningPointKind::Trough => movement > 0.0,
                TurningPointKind::Peak => movement < 0.0,
            };
            if !rebounds {
                continue;
            }

            let depth = (z.abs() / (2.0 * threshold.abs())).clamp(0.0, 1.0);
            let rebound = (movement.abs() / std).clamp(0.0, 1.0);
            let confidence = (0.5 * depth + 0.5 * rebound).clamp(0.0, 1.0);

            *last = Some(i);
            debug!(
                instrument_id = series.instrument_id.as_str(),
                index = i,
                ?kind,
                z,
                confidence,
                "turning point confirmed"
            );
            points.push(TurningPoint {
                instrument_id: series.instrument_id.clone(),
                date: series.dates[i],
                index: i,
                kind,
                confidence,
                evidence: vec![Evidence::PhaseFlip, Evidence::ZScore, Evidence::Rebound],
            });
        }

        points
    }
}
