//! The per-instrument analysis chain.

use serde::{Deserialize, Serialize};
use tracing::debug;

use navcycle_prep::{DetrendConfig, HpDetrender, PreparerConfig, SeriesPreparer, bridge_gaps};
use navcycle_score::{
    AggregatorConfig, ComponentInputs, ScoreAggregator, TurningConfig, TurningPointDetector,
};
use navcycle_signals::{HarmonicFitter, SpectralEstimator, SpectrumConfig, phase_tracker};
use navcycle_traits::{
    AnalysisParams, CompositeScore, Decompose, HarmonicFit, InstrumentId, RawObservation, Result,
    SkipReason, SpectralProfile, StageOutcome, TurningPoint, TurningPointKind,
};

use crate::backtest::{BacktestConfig, Backtester};

/// Residual variance below which there is no cycle worth tracking.
const FLAT_RESIDUAL_VARIANCE: f64 = 1e-12;

/// Residual-to-input variance ratio below which the residual is
/// detrending round-off rather than a cycle. The spectral strength ratio
/// and the trailing z-score are scale-free, so without this gate a
/// noiseless monotone series would clear the same guardrails as a real
/// cycle.
const NEGLIGIBLE_RESIDUAL_RATIO: f64 = 1e-8;

/// Everything one instrument produced in one run.
///
/// The record is self-contained: the output tables and the cache both
/// work from it without recomputing any stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    /// The composite score and its component contributions.
    pub score: CompositeScore,
    /// Confirmed turning points, both kinds, in date order.
    pub turning_points: Vec<TurningPoint>,
    /// Per-trough, per-horizon forward returns.
    pub backtest_records: Vec<navcycle_traits::BacktestRecord>,
    /// Per-horizon backtest aggregates.
    pub backtest_summaries: Vec<navcycle_traits::BacktestSummary>,
    /// Spectral profile, when the estimator ran.
    pub spectral: Option<SpectralProfile>,
    /// Harmonic fit, when the fitter ran.
    pub harmonic: Option<HarmonicFit>,
    /// Filled fraction of the prepared grid.
    pub fill_fraction: f64,
}

/// What became of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentOutcome {
    /// The full chain ran and produced a record.
    Analyzed(Box<InstrumentRecord>),
    /// A stage declined for a structural reason.
    Skipped(SkipReason),
}

/// Runs the full analysis chain for one instrument.
///
/// prepare -> detrend -> {spectrum, harmonic, phase} -> turning points ->
/// composite -> backtest. Stage skips degrade downstream components to
/// missing instead of aborting; numeric failures propagate as errors.
#[derive(Debug, Clone)]
pub struct InstrumentPipeline {
    params: AnalysisParams,
}

impl InstrumentPipeline {
    /// Create a pipeline over a validated parameter bundle.
    pub const fn new(params: AnalysisParams) -> Self {
        Self { params }
    }

    /// The parameter bundle this pipeline runs with.
    pub const fn params(&self) -> &AnalysisParams {
        &self.params
    }

    /// Analyze one instrument's raw observations.
    pub fn run(
        &self,
        instrument_id: &InstrumentId,
        observations: &[RawObservation],
    ) -> Result<InstrumentOutcome> {
        let p = &self.params;

        let preparer = SeriesPreparer::new(PreparerConfig {
            frequency: p.frequency,
            fill_tolerance: p.fill_tolerance,
            max_fill_fraction: p.max_fill_fraction,
            min_history: p.min_history,
        });
        let series = match preparer.prepare(instrument_id, observations)? {
            StageOutcome::Ready(series) => series,
            StageOutcome::Skipped(reason) => return Ok(InstrumentOutcome::Skipped(reason)),
        };

        let detrender = HpDetrender::new(DetrendConfig {
            lambda: p.hp_lambda,
            log_transform: p.log_transform,
        });
        let decomposed = detrender.decompose(&series)?;

        // A residual that is vanishingly small next to the (log-)input is
        // detrending round-off, not a cycle; every cycle stage declines
        // on it and the instrument scores at the no-evidence floor.
        let transformed: Vec<f64> = decomposed
            .trend
            .iter()
            .zip(&decomposed.residual)
            .map(|(t, r)| t + r)
            .collect();
        let residual_var = finite_variance(&decomposed.residual);
        let input_var = finite_variance(&transformed);
        let has_cycle_scale = residual_var > FLAT_RESIDUAL_VARIANCE
            && residual_var > NEGLIGIBLE_RESIDUAL_RATIO * input_var;

        let spectral = if has_cycle_scale {
            let estimator = SpectralEstimator::new(SpectrumConfig {
                band: p.period_band,
                window: p.spectral_window,
            });
            let spectral_outcome = if series.has_gaps() {
                estimator.estimate_irregular(&decomposed.residual)?
            } else {
                estimator.estimate(&decomposed.residual)?
            };
            match spectral_outcome {
                StageOutcome::Ready(profile) => Some(profile),
                StageOutcome::Skipped(reason) => {
                    debug!(
                        instrument_id = instrument_id.as_str(),
                        %reason,
                        "spectral stage declined"
                    );
                    None
                }
            }
        } else {
            debug!(
                instrument_id = instrument_id.as_str(),
                residual_var, input_var, "residual at round-off scale, cycle stages declined"
            );
            None
        };

        let harmonic = match (&spectral, p.harmonic_enabled) {
            (Some(profile), true) => {
                Some(HarmonicFitter::new().fit(&decomposed.residual, profile.dominant_period)?)
            }
            _ => None,
        };

        // Phase tracking needs a gap-free residual.
        let phase = if has_cycle_scale {
            let bridged = bridge_gaps(&decomposed.residual);
            Some(phase_tracker(p).track(&bridged)?)
        } else {
            None
        };

        let turning_points = phase.as_ref().map_or_else(Vec::new, |state| {
            TurningPointDetector::new(TurningConfig {
                zscore_threshold: p.trough_zscore_threshold,
                confirmation_lag: p.confirmation_lag,
                min_spacing: p.min_spacing,
                trailing_window: p.trailing_window,
            })
            .detect(&series, &decomposed.residual, &state.labels)
        });
        let confirmed_troughs = turning_points
            .iter()
            .filter(|t| t.kind == TurningPointKind::Trough)
            .count();

        let aggregator = ScoreAggregator::new(AggregatorConfig {
            weights: p.score_weights.clone(),
            thresholds: p.signal_thresholds.clone(),
            min_vote_count: p.min_vote_count,
            min_evidence_cycles: p.min_evidence_cycles,
            low_evidence_ceiling: p.low_evidence_ceiling,
        });
        let inputs = ComponentInputs {
            spectral: spectral.as_ref().map(|s| s.normalized_strength),
            harmonic: harmonic.as_ref().map(|h| h.fit_quality),
            phase: phase
                .as_ref()
                .map(|s| 0.5 * s.coherence + 0.5 * s.persistence),
            confirmed_troughs,
            expected_cycles: spectral
                .as_ref()
                .map_or(0.0, |s| series.len() as f64 / s.dominant_period),
            fill_fraction: series.fill_fraction,
        };
        let as_of = *series
            .dates
            .last()
            .ok_or_else(|| navcycle_traits::CycleError::Numeric("empty grid".to_string()))?;
        let score = aggregator.aggregate(instrument_id, as_of, &inputs);

        let backtester = Backtester::new(BacktestConfig {
            horizons: p.backtest_horizons.clone(),
            transaction_cost: p.transaction_cost,
        });
        let (backtest_records, backtest_summaries) = backtester.run(&series, &turning_points);

        Ok(InstrumentOutcome::Analyzed(Box::new(InstrumentRecord {
            score,
            turning_points,
            backtest_records,
            backtest_summaries,
            spectral,
            harmonic,
            fill_fraction: series.fill_fraction,
        })))
    }
}

/// Variance of the finite entries of `values` around their mean.
fn finite_variance(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / finite.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcycle_traits::Date;
    use std::f64::consts::TAU;

    fn observations(values: &[f64]) -> Vec<RawObservation> {
        let mut out = Vec::with_capacity(values.len());
        let mut d = Date::from_ymd_opt(2020, 1, 1).unwrap();
        for &v in values {
            out.push(RawObservation {
                instrument_id: "X".to_string(),
                date: d,
                value: v,
            });
            d = d.succ_opt().unwrap();
        }
        out
    }

    fn daily_params() -> AnalysisParams {
        AnalysisParams {
            frequency: navcycle_traits::Frequency::Daily,
            min_history: 200,
            ..AnalysisParams::default()
        }
    }

    fn cyclical_values(n: usize, period: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                100.0 * (0.0002 * t + 0.08 * (TAU * t / period).sin()).exp()
            })
            .collect()
    }

    fn noise(seed: &mut u64) -> f64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((*seed >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    #[test]
    fn test_cyclical_instrument_scores_above_trending() {
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "CYCLICAL".to_string();
        let cyclical = pipeline
            .run(&id, &observations(&cyclical_values(1000, 90.0)))
            .unwrap();

        let mut seed = 11u64;
        let trending: Vec<f64> = (0..1000)
            .map(|i| 100.0 + 0.1 * i as f64 + 0.5 * noise(&mut seed))
            .collect();
        let id2 = "TRENDING".to_string();
        let trend_outcome = pipeline.run(&id2, &observations(&trending)).unwrap();

        let (InstrumentOutcome::Analyzed(c), InstrumentOutcome::Analyzed(t)) =
            (cyclical, trend_outcome)
        else {
            panic!("both instruments should analyze");
        };
        assert!(
            c.score.composite_value > t.score.composite_value,
            "cyclical {} not above trending {}",
            c.score.composite_value,
            t.score.composite_value
        );
        assert!(c.score.composite_value > 0.5);
        assert!(t.score.composite_value < 0.3);
    }

    #[test]
    fn test_dominant_period_recovered_end_to_end() {
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "CYCLICAL".to_string();
        let outcome = pipeline
            .run(&id, &observations(&cyclical_values(1000, 90.0)))
            .unwrap();
        let InstrumentOutcome::Analyzed(record) = outcome else {
            panic!("should analyze");
        };
        let spectral = record.spectral.expect("spectral stage should run");
        assert!(
            (spectral.dominant_period - 90.0).abs() <= 3.0,
            "period {}",
            spectral.dominant_period
        );
        let harmonic = record.harmonic.expect("harmonic stage should run");
        assert!(harmonic.fit_quality > 0.5);
    }

    #[test]
    fn test_noiseless_ramp_scores_at_floor() {
        // A linear ramp is a valid input with no cycle. Its log-detrended
        // residual is pure filter round-off (variance around 1e-12 against
        // an input variance around 1e-2) and must not clear the scale-free
        // guardrails downstream.
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "RAMP".to_string();
        let values: Vec<f64> = (0..1000).map(|i| 100.0 + 0.05 * i as f64).collect();
        let outcome = pipeline.run(&id, &observations(&values)).unwrap();
        let InstrumentOutcome::Analyzed(record) = outcome else {
            panic!("should analyze");
        };
        assert!(record.spectral.is_none());
        assert!(record.turning_points.is_empty());
        assert!(record.backtest_records.is_empty());
        assert_eq!(record.score.vote_count, 0);
        assert!(record.score.composite_value <= pipeline.params().low_evidence_ceiling);
    }

    #[test]
    fn test_exponential_growth_scores_at_floor() {
        // Exactly log-linear: the detrender removes everything and the
        // residual variance is zero end to end.
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "GROWTH".to_string();
        let values: Vec<f64> = (0..600)
            .map(|i| 100.0 * (0.0005 * i as f64).exp())
            .collect();
        let outcome = pipeline.run(&id, &observations(&values)).unwrap();
        let InstrumentOutcome::Analyzed(record) = outcome else {
            panic!("should analyze");
        };
        assert!(record.turning_points.is_empty());
        assert_eq!(record.score.vote_count, 0);
        assert!(record.score.composite_value <= pipeline.params().low_evidence_ceiling);
    }

    #[test]
    fn test_insufficient_history_skips() {
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "SHORT".to_string();
        let outcome = pipeline
            .run(&id, &observations(&cyclical_values(50, 20.0)))
            .unwrap();
        assert!(matches!(
            outcome,
            InstrumentOutcome::Skipped(SkipReason::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn test_empty_observations_skip() {
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "EMPTY".to_string();
        let outcome = pipeline.run(&id, &[]).unwrap();
        assert_eq!(outcome, InstrumentOutcome::Skipped(SkipReason::EmptyInput));
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let pipeline = InstrumentPipeline::new(daily_params());
        let id = "CYCLICAL".to_string();
        let outcome = pipeline
            .run(&id, &observations(&cyclical_values(800, 60.0)))
            .unwrap();
        let InstrumentOutcome::Analyzed(record) = outcome else {
            panic!("should analyze");
        };
        let json = serde_json::to_string(&*record).unwrap();
        let back: InstrumentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, *record);
    }

    #[test]
    fn test_interpolated_series_scores_below_observed() {
        // Same cyclical path, but every fifth week of one copy is missing
        // and gets forward-filled.
        let values = cyclical_values(1000, 90.0);
        let pipeline = InstrumentPipeline::new(daily_params());

        let id_full = "FULL".to_string();
        let full = pipeline.run(&id_full, &observations(&values)).unwrap();

        let sparse: Vec<RawObservation> = observations(&values)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % 25 >= 4)
            .map(|(_, o)| o)
            .collect();
        let id_sparse = "SPARSE".to_string();
        let sparse_outcome = pipeline.run(&id_sparse, &sparse).unwrap();

        let (InstrumentOutcome::Analyzed(f), InstrumentOutcome::Analyzed(s)) =
            (full, sparse_outcome)
        else {
            panic!("both instruments should analyze");
        };
        assert!(s.fill_fraction > 0.0);
        assert!(
            s.score.composite_value < f.score.composite_value,
            "filled series {} should rank below observed {}",
            s.score.composite_value,
            f.score.composite_value
        );
    }

    #[test]
    fn test_backtest_rows_only_for_full_windows() {
        let pipeline = InstrumentPipeline::new(AnalysisParams {
            backtest_horizons: vec![63],
            ..daily_params()
        });
        let id = "CYCLICAL".to_string();
        let outcome = pipeline
            .run(&id, &observations(&cyclical_values(1000, 90.0)))
            .unwrap();
        let InstrumentOutcome::Analyzed(record) = outcome else {
            panic!("should analyze");
        };
        for row in &record.backtest_records {
            let trough = record
                .turning_points
                .iter()
                .find(|t| t.date == row.trough_date)
                .expect("row should trace to a trough");
            assert!(trough.index + row.horizon < 1000);
        }
    }
}
