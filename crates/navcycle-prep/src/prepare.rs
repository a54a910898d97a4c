//! Alignment of raw observations onto a frequency grid.

use serde::{Deserialize, Serialize};
use tracing::debug;

use navcycle_traits::{
    Frequency, PreparedSeries, RawObservation, Result, SkipReason, StageOutcome,
};

/// Configuration for series preparation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparerConfig {
    /// Sampling grid to align onto.
    pub frequency: Frequency,
    /// Longest missing run (grid steps) that gets forward-filled.
    pub fill_tolerance: usize,
    /// Ceiling on the filled fraction before the instrument is skipped.
    pub max_fill_fraction: f64,
    /// Minimum observed grid points required for analysis.
    pub min_history: usize,
}

impl Default for PreparerConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::Business,
            fill_tolerance: 5,
            max_fill_fraction: 0.5,
            min_history: 260,
        }
    }
}

/// Aligns raw observations onto the configured grid.
///
/// The preparer sorts by date, keeps the last observation per date, buckets
/// observations into grid slots, forward-fills missing runs up to the fill
/// tolerance, and leaves longer runs as explicit NaN gap markers. Series
/// that fail the coverage requirements come back as structural skips, never
/// as errors.
#[derive(Debug, Clone)]
pub struct SeriesPreparer {
    config: PreparerConfig,
}

impl SeriesPreparer {
    /// Create a new preparer with the given configuration.
    pub const fn new(config: PreparerConfig) -> Self {
        Self { config }
    }

    /// Align one instrument's observations onto the grid.
    pub fn prepare(
        &self,
        instrument_id: &str,
        observations: &[RawObservation],
    ) -> Result<StageOutcome<PreparedSeries>> {
        // Drop records with non-finite values before anything else.
        let mut cleaned: Vec<(navcycle_traits::Date, f64)> = observations
            .iter()
            .filter(|o| o.value.is_finite())
            .map(|o| (o.date, o.value))
            .collect();
        if cleaned.is_empty() {
            return Ok(StageOutcome::Skipped(SkipReason::EmptyInput));
        }

        // Stable sort keeps ingest order within a date, so "keep the last
        // observation per date" matches the stream's last record.
        cleaned.sort_by_key(|(date, _)| *date);
        let mut deduped: Vec<(navcycle_traits::Date, f64)> = Vec::with_capacity(cleaned.len());
        for (date, value) in cleaned {
            match deduped.last_mut() {
                Some((last_date, last_value)) if *last_date == date => *last_value = value,
                _ => deduped.push((date, value)),
            }
        }

        let first = deduped[0].0;
        let last = deduped[deduped.len() - 1].0;
        let grid = self.config.frequency.grid(first, last);
        if grid.is_empty() {
            return Ok(StageOutcome::Skipped(SkipReason::EmptyInput));
        }

        // Bucket each grid slot with the latest observation on or before it
        // that has not been consumed by an earlier slot.
        let mut values = vec![f64::NAN; grid.len()];
        let mut observed = vec![false; grid.len()];
        let mut j = 0;
        for (i, grid_date) in grid.iter().enumerate() {
            let mut taken = None;
            while j < deduped.len() && deduped[j].0 <= *grid_date {
                taken = Some(deduped[j].1);
                j += 1;
            }
            if let Some(value) = taken {
                values[i] = value;
                observed[i] = true;
            }
        }

        let (filled, longest_gap) = fill_bounded(&mut values, &observed, self.config.fill_tolerance);
        let fill_fraction = filled as f64 / grid.len() as f64;
        let observed_count = observed.iter().filter(|&&o| o).count();

        debug!(
            instrument_id,
            grid_len = grid.len(),
            observed_count,
            fill_fraction,
            longest_gap,
            "series aligned"
        );

        if observed_count < self.config.min_history {
            return Ok(StageOutcome::Skipped(SkipReason::InsufficientHistory {
                observed: observed_count,
                required: self.config.min_history,
            }));
        }
        if fill_fraction > self.config.max_fill_fraction {
            return Ok(StageOutcome::Skipped(SkipReason::ExcessiveFill {
                fraction: fill_fraction,
                ceiling: self.config.max_fill_fraction,
            }));
        }

        Ok(StageOutcome::Ready(PreparedSeries {
            instrument_id: instrument_id.to_string(),
            dates: grid,
            values,
            observed,
            fill_fraction,
            longest_gap,
        }))
    }
}

/// Forward-fill missing runs no longer than `tolerance`, leaving longer
/// runs (and any leading run) as NaN. Returns the number of filled slots
/// and the longest missing run seen.
fn fill_bounded(values: &mut [f64], observed: &[bool], tolerance: usize) -> (usize, usize) {
    let n = values.len();
    let mut filled = 0;
    let mut longest_gap = 0;
    let mut i = 0;
    while i < n {
        if observed[i] {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < n && !observed[i] {
            i += 1;
        }
        let run_len = i - run_start;
        longest_gap = longest_gap.max(run_len);
        if run_len <= tolerance && run_start > 0 {
            let carry = values[run_start - 1];
            if carry.is_finite() {
                for slot in &mut values[run_start..run_start + run_len] {
                    *slot = carry;
                }
                filled += run_len;
            }
        }
    }
    (filled, longest_gap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcycle_traits::Date;

    fn d(y: i32, m: u32, day: u32) -> Date {
        Date::from_ymd_opt(y, m, day).unwrap()
    }

    fn obs(date: Date, value: f64) -> RawObservation {
        RawObservation {
            instrument_id: "X".to_string(),
            date,
            value,
        }
    }

    fn daily_preparer(min_history: usize) -> SeriesPreparer {
        SeriesPreparer::new(PreparerConfig {
            frequency: Frequency::Daily,
            fill_tolerance: 2,
            max_fill_fraction: 0.5,
            min_history,
        })
    }

    #[test]
    fn test_empty_input_skipped() {
        let preparer = daily_preparer(1);
        let outcome = preparer.prepare("X", &[]).unwrap();
        assert_eq!(outcome, StageOutcome::Skipped(SkipReason::EmptyInput));
    }

    #[test]
    fn test_sorts_and_keeps_last_duplicate() {
        let preparer = daily_preparer(1);
        let observations = vec![
            obs(d(2024, 1, 3), 3.0),
            obs(d(2024, 1, 1), 1.0),
            obs(d(2024, 1, 1), 1.5), // later record for the same date wins
            obs(d(2024, 1, 2), 2.0),
        ];
        let outcome = preparer.prepare("X", &observations).unwrap();
        let series = outcome.ready().unwrap();
        assert_eq!(series.values, vec![1.5, 2.0, 3.0]);
        assert!(series.observed.iter().all(|&o| o));
        assert_eq!(series.fill_fraction, 0.0);
    }

    #[test]
    fn test_short_gap_forward_filled() {
        let preparer = daily_preparer(1);
        let observations = vec![
            obs(d(2024, 1, 1), 1.0),
            obs(d(2024, 1, 2), 2.0),
            // 3rd and 4th missing, within tolerance 2
            obs(d(2024, 1, 5), 5.0),
        ];
        let outcome = preparer.prepare("X", &observations).unwrap();
        let series = outcome.ready().unwrap();
        assert_eq!(series.values, vec![1.0, 2.0, 2.0, 2.0, 5.0]);
        assert_eq!(series.observed, vec![true, true, false, false, true]);
        assert!((series.fill_fraction - 0.4).abs() < 1e-12);
        assert_eq!(series.longest_gap, 2);
    }

    #[test]
    fn test_long_gap_stays_nan() {
        let preparer = daily_preparer(1);
        let observations = vec![
            obs(d(2024, 1, 1), 1.0),
            // 4-step gap exceeds tolerance 2
            obs(d(2024, 1, 6), 6.0),
        ];
        let outcome = preparer.prepare("X", &observations).unwrap();
        let series = outcome.ready().unwrap();
        assert!(series.values[1..5].iter().all(|v| v.is_nan()));
        assert!(series.has_gaps());
        assert_eq!(series.longest_gap, 4);
        assert_eq!(series.fill_fraction, 0.0);
    }

    #[test]
    fn test_insufficient_history_skipped() {
        let preparer = daily_preparer(10);
        let observations = vec![obs(d(2024, 1, 1), 1.0), obs(d(2024, 1, 2), 2.0)];
        let outcome = preparer.prepare("X", &observations).unwrap();
        assert!(matches!(
            outcome,
            StageOutcome::Skipped(SkipReason::InsufficientHistory {
                observed: 2,
                required: 10
            })
        ));
    }

    #[test]
    fn test_excessive_fill_skipped() {
        let preparer = SeriesPreparer::new(PreparerConfig {
            frequency: Frequency::Daily,
            fill_tolerance: 10,
            max_fill_fraction: 0.3,
            min_history: 1,
        });
        // 2 observed, 4 filled: fill fraction 4/6 > 0.3.
        let observations = vec![obs(d(2024, 1, 1), 1.0), obs(d(2024, 1, 6), 6.0)];
        let outcome = preparer.prepare("X", &observations).unwrap();
        assert!(matches!(
            outcome,
            StageOutcome::Skipped(SkipReason::ExcessiveFill { .. })
        ));
    }

    #[test]
    fn test_non_finite_values_dropped() {
        let preparer = daily_preparer(1);
        let observations = vec![
            obs(d(2024, 1, 1), 1.0),
            obs(d(2024, 1, 2), f64::NAN),
            obs(d(2024, 1, 3), 3.0),
        ];
        let outcome = preparer.prepare("X", &observations).unwrap();
        let series = outcome.ready().unwrap();
        // The NaN record behaves like a missing day and gets filled.
        assert_eq!(series.values, vec![1.0, 1.0, 3.0]);
        assert_eq!(series.observed, vec![true, false, true]);
    }

    #[test]
    fn test_business_grid_alignment() {
        let preparer = SeriesPreparer::new(PreparerConfig {
            frequency: Frequency::Business,
            fill_tolerance: 2,
            max_fill_fraction: 0.5,
            min_history: 1,
        });
        // Friday, then a Saturday print with no business slot to land in.
        let observations = vec![obs(d(2024, 1, 5), 1.0), obs(d(2024, 1, 6), 2.0)];
        let outcome = preparer.prepare("X", &observations).unwrap();
        let series = outcome.ready().unwrap();
        assert_eq!(series.dates, vec![d(2024, 1, 5)]);
        assert_eq!(series.values, vec![1.0]);
    }
}
