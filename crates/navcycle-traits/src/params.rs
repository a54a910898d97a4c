//! The run parameter bundle.
//!
//! Every component reads its options from a single [`AnalysisParams`] value,
//! validated once at run start. The bundle serializes deterministically
//! (maps are `BTreeMap`s) so its blake3 fingerprint is stable and can key
//! the analysis cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CycleError, Result};
use crate::types::{Frequency, SignalKind};

/// Inclusive period search band, in grid steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodBand {
    /// Shortest period considered cyclical.
    pub min: f64,
    /// Longest period considered cyclical.
    pub max: f64,
}

impl PeriodBand {
    /// Whether `period` falls inside the band.
    pub fn contains(&self, period: f64) -> bool {
        period >= self.min && period <= self.max
    }
}

impl Default for PeriodBand {
    fn default() -> Self {
        Self {
            min: 30.0,
            max: 730.0,
        }
    }
}

/// Taper applied before the FFT periodogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralWindow {
    /// Hann taper (default).
    Hann,
    /// No taper.
    Boxcar,
}

/// Which phase-tracking backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseModelKind {
    /// Analytic-signal phase via the Hilbert transform.
    Hilbert,
    /// Damped stochastic-cycle Kalman filter.
    StateSpace,
}

/// All run options, with defaults tuned for business-daily NAV series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Sampling grid the preparer aligns each series onto.
    pub frequency: Frequency,
    /// Longest gap run (grid steps) the preparer forward-fills.
    pub fill_tolerance: usize,
    /// Ceiling on the filled fraction before the instrument is skipped.
    pub max_fill_fraction: f64,
    /// Minimum observed grid points required for analysis.
    pub min_history: usize,
    /// Hodrick-Prescott smoothing parameter.
    pub hp_lambda: f64,
    /// Whether to detrend log values when all values are positive.
    pub log_transform: bool,
    /// Period search band for the spectral estimator.
    pub period_band: PeriodBand,
    /// Taper applied before the FFT periodogram.
    pub spectral_window: SpectralWindow,
    /// Whether the harmonic fit runs at all.
    pub harmonic_enabled: bool,
    /// Which phase-tracking backend to run.
    pub phase_model: PhaseModelKind,
    /// Oscillation period (grid steps) of the state-space backend.
    pub state_space_period: f64,
    /// Damping factor of the state-space oscillator, in (0, 1).
    pub state_space_damping: f64,
    /// Z-score a trough candidate must breach (negative).
    pub trough_zscore_threshold: f64,
    /// Grid steps after a candidate over which the rebound is checked.
    pub confirmation_lag: usize,
    /// Minimum grid steps between accepted points of the same kind.
    pub min_spacing: usize,
    /// Trailing window (grid steps) for the z-score baseline.
    pub trailing_window: usize,
    /// Weight of each component signal in the composite.
    pub score_weights: BTreeMap<SignalKind, f64>,
    /// Per-signal significance threshold for vote counting.
    pub signal_thresholds: BTreeMap<SignalKind, f64>,
    /// Votes required before the composite may exceed the ceiling.
    pub min_vote_count: usize,
    /// Expected-cycle floor when no dominant period is available.
    pub min_evidence_cycles: usize,
    /// Composite cap applied under the vote minimum.
    pub low_evidence_ceiling: f64,
    /// Forward-return horizons, in grid steps.
    pub backtest_horizons: Vec<usize>,
    /// Round-trip transaction cost subtracted from each forward return.
    pub transaction_cost: f64,
    /// Abort the whole run on the first fatal per-instrument error.
    pub fail_fast: bool,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            frequency: Frequency::Business,
            fill_tolerance: 5,
            max_fill_fraction: 0.5,
            min_history: 260,
            hp_lambda: 129_600.0,
            log_transform: true,
            period_band: PeriodBand::default(),
            spectral_window: SpectralWindow::Hann,
            harmonic_enabled: true,
            phase_model: PhaseModelKind::Hilbert,
            state_space_period: 60.0,
            state_space_damping: 0.94,
            trough_zscore_threshold: -1.5,
            confirmation_lag: 10,
            min_spacing: 20,
            trailing_window: 63,
            score_weights: BTreeMap::from([
                (SignalKind::Spectral, 0.3),
                (SignalKind::Harmonic, 0.2),
                (SignalKind::Phase, 0.2),
                (SignalKind::TurningPoints, 0.3),
            ]),
            signal_thresholds: BTreeMap::from([
                (SignalKind::Spectral, 0.5),
                (SignalKind::Harmonic, 0.4),
                (SignalKind::Phase, 0.5),
                (SignalKind::TurningPoints, 0.2),
            ]),
            min_vote_count: 2,
            min_evidence_cycles: 3,
            low_evidence_ceiling: 0.1,
            backtest_horizons: vec![63, 126, 252],
            transaction_cost: 0.0,
            fail_fast: false,
        }
    }
}

impl AnalysisParams {
    /// Validate the bundle, rejecting the run on the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.min_history == 0 {
            return Err(CycleError::InvalidConfig(
                "min_history must be positive".to_string(),
            ));
        }
        if !(self.max_fill_fraction > 0.0 && self.max_fill_fraction <= 1.0) {
            return Err(CycleError::InvalidConfig(format!(
                "max_fill_fraction must be in (0, 1], got {}",
                self.max_fill_fraction
            )));
        }
        if self.hp_lambda <= 0.0 {
            return Err(CycleError::InvalidConfig(format!(
                "hp_lambda must be positive, got {}",
                self.hp_lambda
            )));
        }
        if !(self.period_band.min > 1.0 && self.period_band.min < self.period_band.max) {
            return Err(CycleError::InvalidConfig(format!(
                "period band must satisfy 1 < min < max, got [{}, {}]",
                self.period_band.min, self.period_band.max
            )));
        }
        if !(self.state_space_damping > 0.0 && self.state_space_damping < 1.0) {
            return Err(CycleError::InvalidConfig(format!(
                "state_space_damping must be in (0, 1), got {}",
                self.state_space_damping
            )));
        }
        if self.state_space_period <= 2.0 {
            return Err(CycleError::InvalidConfig(format!(
                "state_space_period must exceed 2 grid steps, got {}",
                self.state_space_period
            )));
        }
        if self.trough_zscore_threshold >= 0.0 {
            return Err(CycleError::InvalidConfig(format!(
                "trough_zscore_threshold must be negative, got {}",
                self.trough_zscore_threshold
            )));
        }
        if self.confirmation_lag == 0 || self.min_spacing == 0 || self.trailing_window == 0 {
            return Err(CycleError::InvalidConfig(
                "confirmation_lag, min_spacing and trailing_window must be positive".to_string(),
            ));
        }
        if self.score_weights.is_empty() {
            return Err(CycleError::InvalidConfig(
                "score_weights must not be empty".to_string(),
            ));
        }
        for (kind, weight) in &self.score_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(CycleError::InvalidConfig(format!(
                    "weight for {} must be finite and non-negative, got {weight}",
                    kind.as_str()
                )));
            }
        }
        if self.score_weights.values().sum::<f64>() <= 0.0 {
            return Err(CycleError::InvalidConfig(
                "score_weights must sum to a positive total".to_string(),
            ));
        }
        if !(self.low_evidence_ceiling >= 0.0 && self.low_evidence_ceiling <= 1.0) {
            return Err(CycleError::InvalidConfig(format!(
                "low_evidence_ceiling must be in [0, 1], got {}",
                self.low_evidence_ceiling
            )));
        }
        if self.backtest_horizons.is_empty() || self.backtest_horizons.contains(&0) {
            return Err(CycleError::InvalidConfig(
                "backtest_horizons must be non-empty and positive".to_string(),
            ));
        }
        if self.min_evidence_cycles == 0 {
            return Err(CycleError::InvalidConfig(
                "min_evidence_cycles must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Blake3 fingerprint of the bundle's canonical JSON form.
    ///
    /// Identical bundles always fingerprint identically; any option change
    /// changes the fingerprint and invalidates cached results.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AnalysisParams::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_period_band_rejected() {
        let params = AnalysisParams {
            period_band: PeriodBand {
                min: 730.0,
                max: 30.0,
            },
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(CycleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_positive_trough_threshold_rejected() {
        let params = AnalysisParams {
            trough_zscore_threshold: 1.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_empty_weights_rejected() {
        let params = AnalysisParams {
            score_weights: BTreeMap::new(),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let params = AnalysisParams {
            backtest_horizons: vec![63, 0],
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = AnalysisParams::default();
        let b = AnalysisParams::default();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let c = AnalysisParams {
            min_history: 261,
            ..Default::default()
        };
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        // An empty document deserializes to the full default bundle.
        let params: AnalysisParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, AnalysisParams::default());
    }

    #[test]
    fn test_period_band_contains() {
        let band = PeriodBand::default();
        assert!(band.contains(90.0));
        assert!(!band.contains(10.0));
        assert!(!band.contains(1000.0));
    }
}
