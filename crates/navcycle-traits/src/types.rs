//! Core record types flowing through the navcycle pipeline.
//!
//! Every stage consumes and produces plain data: the records here are
//! serializable so a complete per-instrument result can round-trip through
//! the analysis cache.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, Months, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::SkipReason;

// Re-export date type from chrono
pub use chrono::NaiveDate as Date;

/// An instrument identifier.
///
/// Typically a fund or scheme code such as "118989" or a ticker-like label.
pub type InstrumentId = String;

/// One raw ingest record: an instrument's value on a date.
///
/// Raw observations are immutable; the preparer works on sorted copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    /// The instrument the observation belongs to.
    pub instrument_id: InstrumentId,
    /// Observation date.
    pub date: Date,
    /// NAV-style price level.
    pub value: f64,
}

/// Sampling grid the preparer aligns each series onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Every calendar day.
    Daily,
    /// Monday through Friday.
    Business,
    /// Every seventh day from the series start.
    Weekly,
    /// The last calendar day of each month.
    Monthly,
}

impl Frequency {
    /// Build the grid of dates spanning `[start, end]` at this frequency.
    ///
    /// Returns an empty grid when `start > end`.
    pub fn grid(self, start: Date, end: Date) -> Vec<Date> {
        let mut dates = Vec::new();
        if start > end {
            return dates;
        }
        match self {
            Self::Daily => {
                let mut d = start;
                while d <= end {
                    dates.push(d);
                    match d.checked_add_days(Days::new(1)) {
                        Some(next) => d = next,
                        None => break,
                    }
                }
            }
            Self::Business => {
                let mut d = start;
                while d <= end {
                    if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
                        dates.push(d);
                    }
                    match d.checked_add_days(Days::new(1)) {
                        Some(next) => d = next,
                        None => break,
                    }
                }
            }
            Self::Weekly => {
                let mut d = start;
                while d <= end {
                    dates.push(d);
                    match d.checked_add_days(Days::new(7)) {
                        Some(next) => d = next,
                        None => break,
                    }
                }
            }
            Self::Monthly => {
                let mut d = month_end(start);
                while d <= end {
                    if d >= start {
                        dates.push(d);
                    }
                    match d
                        .checked_add_days(Days::new(1))
                        .map(month_end)
                    {
                        Some(next) => d = next,
                        None => break,
                    }
                }
            }
        }
        dates
    }
}

/// Last calendar day of the month containing `date`.
fn month_end(date: Date) -> Date {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .unwrap_or(date)
}

/// Outcome of a pipeline stage that may decline to produce a value.
///
/// Skips are data, not errors: downstream stages degrade and the instrument
/// keeps flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome<T> {
    /// The stage produced its output.
    Ready(T),
    /// The stage declined, with the structural reason.
    Skipped(SkipReason),
}

impl<T> StageOutcome<T> {
    /// The produced value, if any.
    pub const fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Skipped(_) => None,
        }
    }

    /// Whether the stage declined.
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// A series aligned onto its frequency grid, with coverage bookkeeping.
///
/// `values[i]` is NaN exactly where a gap run exceeded the fill tolerance;
/// `observed[i]` is false wherever the value was forward-filled or is a gap
/// marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedSeries {
    /// The instrument the series belongs to.
    pub instrument_id: InstrumentId,
    /// Grid dates, strictly increasing.
    pub dates: Vec<Date>,
    /// Values aligned with `dates`; NaN marks an unfilled gap.
    pub values: Vec<f64>,
    /// Whether each grid point carries an actual observation.
    pub observed: Vec<bool>,
    /// Fraction of grid points that were forward-filled.
    pub fill_fraction: f64,
    /// Length of the longest run of missing grid points.
    pub longest_gap: usize,
}

impl PreparedSeries {
    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of grid points carrying actual observations.
    pub fn observed_count(&self) -> usize {
        self.observed.iter().filter(|&&o| o).count()
    }

    /// Whether any unfilled gap markers remain.
    pub fn has_gaps(&self) -> bool {
        self.values.iter().any(|v| !v.is_finite())
    }
}

/// A trend/residual split of a prepared series.
///
/// Invariant: `trend[i] + residual[i]` reconstructs the (log-transformed)
/// input at every finite grid point within 1e-9 relative tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedSeries {
    /// Smooth trend component, aligned with the prepared grid.
    pub trend: Vec<f64>,
    /// Cyclical residual; NaN wherever the input had a gap marker.
    pub residual: Vec<f64>,
    /// Whether the decomposition ran on log-transformed values.
    pub log_applied: bool,
    /// Whether the series was too short to filter and the trend degraded
    /// to the series mean.
    pub null_trend: bool,
}

/// Summary of the residual's power spectrum inside the period search band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralProfile {
    /// Period (in grid steps) of the strongest in-band peak.
    pub dominant_period: f64,
    /// Power integrated over the peak's main lobe.
    pub power_at_dominant: f64,
    /// Total power inside the search band.
    pub total_band_power: f64,
    /// `power_at_dominant / total_band_power`, clipped to [0, 1].
    pub normalized_strength: f64,
}

/// A single sinusoid fitted to the residual at the dominant period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicFit {
    /// Fixed period the sinusoid was fitted at, in grid steps.
    pub period: f64,
    /// Fitted amplitude.
    pub amplitude: f64,
    /// Fitted phase offset in radians.
    pub phase: f64,
    /// Explained-variance ratio of the fit, clipped to [0, 1].
    pub fit_quality: f64,
}

/// Position of a grid point within the local cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleLabel {
    /// Cycle component increasing.
    Rising,
    /// Cycle component decreasing.
    Falling,
    /// Local minimum of the cycle component.
    Trough,
    /// Local maximum of the cycle component.
    Peak,
    /// Amplitude too small (or boundary) to classify.
    Undetermined,
}

/// Phase-tracking output: where each point sits in its cycle, plus
/// stability diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    /// Unwrapped instantaneous phase in radians.
    pub phase: Vec<f64>,
    /// Instantaneous amplitude envelope.
    pub amplitude: Vec<f64>,
    /// The tracked cycle component.
    pub cycle: Vec<f64>,
    /// Per-point cycle position labels.
    pub labels: Vec<CycleLabel>,
    /// Mean resultant length of phase increments, in [0, 1].
    pub coherence: f64,
    /// Lag-1 autocorrelation of the cycle component, clamped to [0, 1].
    pub persistence: f64,
}

/// Kind of a confirmed turning point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurningPointKind {
    /// Local cycle minimum.
    Trough,
    /// Local cycle maximum.
    Peak,
}

/// A guardrail that fired while confirming a turning point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    /// The cycle component's direction flipped at this point.
    PhaseFlip,
    /// The residual z-score versus its trailing window breached the
    /// threshold.
    ZScore,
    /// The residual moved back in the confirming direction over the
    /// confirmation lag.
    Rebound,
}

/// A confirmed cycle turning point.
///
/// Turning points are immutable once emitted; a new run recomputes the full
/// set rather than editing prior output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurningPoint {
    /// The instrument the point belongs to.
    pub instrument_id: InstrumentId,
    /// Grid date of the turning point.
    pub date: Date,
    /// Index into the prepared grid.
    pub index: usize,
    /// Trough or peak.
    pub kind: TurningPointKind,
    /// Confirmation confidence in [0, 1].
    pub confidence: f64,
    /// Guardrails that fired during confirmation.
    pub evidence: Vec<Evidence>,
}

/// The component signals feeding the composite score.
///
/// Adding a signal means adding a variant here plus a default weight and
/// threshold; the aggregator iterates the weight map and needs no other
/// change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Spectral concentration of in-band power.
    Spectral,
    /// Harmonic fit quality at the dominant period.
    Harmonic,
    /// Phase coherence and persistence.
    Phase,
    /// Confirmed turning-point evidence.
    TurningPoints,
}

impl SignalKind {
    /// All component signals, in ranking-table column order.
    pub const ALL: [Self; 4] = [
        Self::Spectral,
        Self::Harmonic,
        Self::Phase,
        Self::TurningPoints,
    ];

    /// Stable snake_case name, used for table columns and weight keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spectral => "spectral",
            Self::Harmonic => "harmonic",
            Self::Phase => "phase",
            Self::TurningPoints => "turning_points",
        }
    }
}

/// One instrument's composite cyclicality score for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// The scored instrument.
    pub instrument_id: InstrumentId,
    /// Last grid date of the analyzed series.
    pub as_of: Date,
    /// Weighted composite in [0, 1].
    pub composite_value: f64,
    /// Renormalized weighted contribution of each present component.
    ///
    /// Contributions sum to the unpenalized composite: the coverage
    /// scaling and the low-evidence cap apply to `composite_value` only.
    pub contributions: BTreeMap<SignalKind, f64>,
    /// Number of components that cleared their significance threshold.
    pub vote_count: usize,
}

/// One trough acted on at one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    /// The instrument the signal belongs to.
    pub instrument_id: InstrumentId,
    /// Date of the confirmed trough.
    pub trough_date: Date,
    /// Holding horizon in grid steps.
    pub horizon: usize,
    /// Net forward return over the horizon.
    pub forward_return: f64,
    /// Whether the net forward return was positive.
    pub hit: bool,
}

/// Per-(instrument, horizon) backtest aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    /// The instrument the aggregate covers.
    pub instrument_id: InstrumentId,
    /// Holding horizon in grid steps.
    pub horizon: usize,
    /// Number of troughs with a full forward window.
    pub signals: usize,
    /// Fraction of signals with positive net forward return.
    pub hit_rate: f64,
    /// Mean net forward return.
    pub mean_return: f64,
    /// Median net forward return.
    pub median_return: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> Date {
        Date::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_daily_grid_spans_inclusive() {
        let grid = Frequency::Daily.grid(d(2024, 1, 1), d(2024, 1, 5));
        assert_eq!(grid.len(), 5);
        assert_eq!(grid[0], d(2024, 1, 1));
        assert_eq!(grid[4], d(2024, 1, 5));
    }

    #[test]
    fn test_business_grid_skips_weekends() {
        // 2024-01-05 is a Friday; 6th/7th are the weekend.
        let grid = Frequency::Business.grid(d(2024, 1, 5), d(2024, 1, 9));
        assert_eq!(grid, vec![d(2024, 1, 5), d(2024, 1, 8), d(2024, 1, 9)]);
    }

    #[test]
    fn test_weekly_grid_steps_seven_days() {
        let grid = Frequency::Weekly.grid(d(2024, 1, 1), d(2024, 1, 22));
        assert_eq!(
            grid,
            vec![d(2024, 1, 1), d(2024, 1, 8), d(2024, 1, 15), d(2024, 1, 22)]
        );
    }

    #[test]
    fn test_monthly_grid_month_ends() {
        let grid = Frequency::Monthly.grid(d(2024, 1, 15), d(2024, 4, 10));
        assert_eq!(grid, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31)]);
    }

    #[test]
    fn test_grid_empty_when_inverted() {
        assert!(Frequency::Daily.grid(d(2024, 2, 1), d(2024, 1, 1)).is_empty());
    }

    #[test]
    fn test_prepared_series_counters() {
        let series = PreparedSeries {
            instrument_id: "X".to_string(),
            dates: vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3)],
            values: vec![1.0, f64::NAN, 1.2],
            observed: vec![true, false, true],
            fill_fraction: 0.0,
            longest_gap: 1,
        };
        assert_eq!(series.len(), 3);
        assert_eq!(series.observed_count(), 2);
        assert!(series.has_gaps());
    }

    #[test]
    fn test_stage_outcome_accessors() {
        let ready: StageOutcome<i32> = StageOutcome::Ready(7);
        assert_eq!(ready.ready(), Some(&7));
        assert!(!ready.is_skipped());

        let skipped: StageOutcome<i32> =
            StageOutcome::Skipped(crate::error::SkipReason::EmptyInput);
        assert!(skipped.is_skipped());
        assert_eq!(skipped.ready(), None);
    }

    #[test]
    fn test_signal_kind_names() {
        assert_eq!(SignalKind::Spectral.as_str(), "spectral");
        assert_eq!(SignalKind::TurningPoints.as_str(), "turning_points");
        assert_eq!(SignalKind::ALL.len(), 4);
    }

    #[test]
    fn test_signal_kind_map_keys_serialize_as_strings() {
        let mut contributions = BTreeMap::new();
        contributions.insert(SignalKind::Spectral, 0.25);
        contributions.insert(SignalKind::Phase, 0.10);
        let json = serde_json::to_string(&contributions).unwrap();
        assert!(json.contains("\"spectral\""));
        assert!(json.contains("\"phase\""));
        let back: BTreeMap<SignalKind, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, contributions);
    }

    #[test]
    fn test_composite_score_round_trip() {
        let score = CompositeScore {
            instrument_id: "FUND_A".to_string(),
            as_of: d(2024, 6, 28),
            composite_value: 0.42,
            contributions: BTreeMap::from([(SignalKind::Spectral, 0.3)]),
            vote_count: 2,
        };
        let json = serde_json::to_string(&score).unwrap();
        let back: CompositeScore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, score);
    }
}
