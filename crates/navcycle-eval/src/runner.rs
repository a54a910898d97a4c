//! Universe-level fan-out, fan-in and ranking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use navcycle_traits::{
    AnalysisParams, BacktestRecord, BacktestSummary, CompositeScore, CycleError, Diagnostic,
    DiagnosticKind, InstrumentId, RawObservation, Result, TurningPoint,
};

use crate::cache::{AnalysisCache, CacheKey};
use crate::pipeline::{InstrumentOutcome, InstrumentPipeline, InstrumentRecord};

/// Everything one run produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// One score per analyzed instrument, composite descending with
    /// instrument id as the tie-break.
    pub ranking: Vec<CompositeScore>,
    /// All confirmed turning points across the universe.
    pub turning_points: Vec<TurningPoint>,
    /// All per-trough backtest rows.
    pub backtest_records: Vec<BacktestRecord>,
    /// All per-(instrument, horizon) backtest aggregates.
    pub backtest_summaries: Vec<BacktestSummary>,
    /// Every instrument that produced no score, with the reason.
    pub diagnostics: Vec<Diagnostic>,
    /// Full per-instrument records, in instrument-id order.
    pub records: Vec<InstrumentRecord>,
}

enum TaskResult {
    Scored(Box<InstrumentRecord>),
    Skipped(Diagnostic),
    Failed(InstrumentId, CycleError),
    DeadlineSkipped(InstrumentId),
    Cancelled,
}

/// Fans the per-instrument pipeline out over a worker pool.
///
/// Instruments share nothing mutable: each task reads the parameter
/// bundle and its own observations and produces an independent record,
/// collected single-threaded afterwards. The whole run is deterministic
/// for a given universe and bundle regardless of worker count.
pub struct Runner {
    pipeline: InstrumentPipeline,
    cache: Option<Arc<dyn AnalysisCache>>,
    deadline: Option<Duration>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("pipeline", &self.pipeline)
            .field("cache", &self.cache.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Runner {
    /// Create a runner over a parameter bundle.
    pub const fn new(params: AnalysisParams) -> Self {
        Self {
            pipeline: InstrumentPipeline::new(params),
            cache: None,
            deadline: None,
        }
    }

    /// Attach a read-through cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bound the run's wall-clock time. Tasks not yet started when the
    /// deadline passes are recorded as deadline-skipped; tasks already
    /// running finish normally.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Analyze a universe of instruments.
    ///
    /// Validates the parameter bundle first; an invalid bundle rejects
    /// the run before any per-instrument work.
    pub fn run(
        &self,
        universe: &BTreeMap<InstrumentId, Vec<RawObservation>>,
    ) -> Result<RunOutput> {
        let params = self.pipeline.params();
        params.validate()?;
        let params_fingerprint = params.fingerprint()?;

        let start = Instant::now();
        let cancelled = AtomicBool::new(false);
        let fail_fast = params.fail_fast;

        let mut results: Vec<TaskResult> = universe
            .par_iter()
            .map(|(instrument_id, observations)| {
                if cancelled.load(Ordering::Relaxed) {
                    return TaskResult::Cancelled;
                }
                if let Some(deadline) = self.deadline {
                    if start.elapsed() >= deadline {
                        return TaskResult::DeadlineSkipped(instrument_id.clone());
                    }
                }
                let result =
                    self.run_one(instrument_id, observations, &params_fingerprint);
                if fail_fast && matches!(result, TaskResult::Failed(..)) {
                    cancelled.store(true, Ordering::Relaxed);
                }
                result
            })
            .collect();

        if fail_fast {
            if let Some(pos) = results
                .iter()
                .position(|r| matches!(r, TaskResult::Failed(..)))
            {
                if let TaskResult::Failed(instrument_id, error) = results.remove(pos) {
                    info!(instrument_id = instrument_id.as_str(), "aborting run");
                    return Err(error);
                }
            }
        }

        let mut output = RunOutput::default();
        for result in results {
            match result {
                TaskResult::Scored(record) => {
                    output.ranking.push(record.score.clone());
                    output.turning_points.extend(record.turning_points.clone());
                    output
                        .backtest_records
                        .extend(record.backtest_records.clone());
                    output
                        .backtest_summaries
                        .extend(record.backtest_summaries.clone());
                    output.records.push(*record);
                }
                TaskResult::Skipped(diagnostic) => output.diagnostics.push(diagnostic),
                TaskResult::Failed(instrument_id, error) => {
                    warn!(
                        instrument_id = instrument_id.as_str(),
                        error = %error,
                        "instrument failed"
                    );
                    output
                        .diagnostics
                        .push(Diagnostic::failed(instrument_id, &error));
                }
                TaskResult::DeadlineSkipped(instrument_id) => {
                    output.diagnostics.push(Diagnostic {
                        instrument_id,
                        kind: DiagnosticKind::DeadlineSkipped,
                    });
                }
                TaskResult::Cancelled => {}
            }
        }

        // Composite descending; instrument id ascending breaks ties
        // deterministically.
        output.ranking.sort_by(|a, b| {
            b.composite_value
                .partial_cmp(&a.composite_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.instrument_id.cmp(&b.instrument_id))
        });

        info!(
            scored = output.ranking.len(),
            excluded = output.diagnostics.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(output)
    }

    fn run_one(
        &self,
        instrument_id: &InstrumentId,
        observations: &[RawObservation],
        params_fingerprint: &str,
    ) -> TaskResult {
        let key = if self.cache.is_some() {
            match CacheKey::new(instrument_id, observations, params_fingerprint) {
                Ok(key) => Some(key),
                Err(e) => return TaskResult::Failed(instrument_id.clone(), e),
            }
        } else {
            None
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            match cache.get(key) {
                Ok(Some(record)) => {
                    debug!(instrument_id = instrument_id.as_str(), "cache hit");
                    return TaskResult::Scored(Box::new(record));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        instrument_id = instrument_id.as_str(),
                        error = %e,
                        "cache read failed, recomputing"
                    );
                }
            }
        }

        match self.pipeline.run(instrument_id, observations) {
            Ok(InstrumentOutcome::Analyzed(record)) => {
                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    if let Err(e) = cache.put(key, &record) {
                        warn!(
                            instrument_id = instrument_id.as_str(),
                            error = %e,
                            "cache write failed"
                        );
                    }
                }
                TaskResult::Scored(record)
            }
            Ok(InstrumentOutcome::Skipped(reason)) => {
                TaskResult::Skipped(Diagnostic::skipped(instrument_id.clone(), reason))
            }
            Err(error) => TaskResult::Failed(instrument_id.clone(), error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use navcycle_traits::{Date, Frequency, SkipReason};
    use std::f64::consts::TAU;

    fn observations(values: &[f64]) -> Vec<RawObservation> {
        let mut out = Vec::with_capacity(values.len());
        let mut d = Date::from_ymd_opt(2020, 1, 1).unwrap();
        for &v in values {
            out.push(RawObservation {
                instrument_id: String::new(),
                date: d,
                value: v,
            });
            d = d.succ_opt().unwrap();
        }
        out
    }

    fn cyclical(n: usize, period: f64, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                100.0 * (0.0002 * t + amplitude * (TAU * t / period).sin()).exp()
            })
            .collect()
    }

    fn params() -> AnalysisParams {
        AnalysisParams {
            frequency: Frequency::Daily,
            min_history: 200,
            ..AnalysisParams::default()
        }
    }

    fn universe() -> BTreeMap<InstrumentId, Vec<RawObservation>> {
        BTreeMap::from([
            ("STRONG".to_string(), observations(&cyclical(1000, 90.0, 0.08))),
            ("WEAK".to_string(), observations(&cyclical(1000, 90.0, 0.01))),
            ("SHORT".to_string(), observations(&cyclical(50, 20.0, 0.08))),
        ])
    }

    #[test]
    fn test_ranking_sorted_and_skips_diagnosed() {
        let output = Runner::new(params()).run(&universe()).unwrap();
        assert_eq!(output.ranking.len(), 2);
        assert!(
            output.ranking[0].composite_value >= output.ranking[1].composite_value
        );
        // The short instrument is excluded from the ranking and named in
        // the diagnostics.
        assert!(output.ranking.iter().all(|s| s.instrument_id != "SHORT"));
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].instrument_id, "SHORT");
        assert!(matches!(
            output.diagnostics[0].kind,
            DiagnosticKind::Skipped {
                reason: SkipReason::InsufficientHistory { .. }
            }
        ));
    }

    #[test]
    fn test_run_is_idempotent() {
        let runner = Runner::new(params());
        let u = universe();
        let a = runner.run(&u).unwrap();
        let b = runner.run(&u).unwrap();
        assert_eq!(a.ranking, b.ranking);
        assert_eq!(a.turning_points, b.turning_points);
        assert_eq!(a.backtest_records, b.backtest_records);
    }

    #[test]
    fn test_invalid_params_reject_run() {
        let bad = AnalysisParams {
            min_history: 0,
            ..params()
        };
        let result = Runner::new(bad).run(&universe());
        assert!(matches!(result, Err(CycleError::InvalidConfig(_))));
    }

    #[test]
    fn test_cache_hit_short_circuits() {
        let cache = Arc::new(MemoryCache::new());
        let runner = Runner::new(params()).with_cache(cache.clone());
        let u = universe();
        let first = runner.run(&u).unwrap();
        assert_eq!(cache.len(), 2); // skipped instruments are not cached
        let second = runner.run(&u).unwrap();
        assert_eq!(first.ranking, second.ranking);
    }

    #[test]
    fn test_params_change_invalidates_cache() {
        let cache = Arc::new(MemoryCache::new());
        let u = universe();
        Runner::new(params())
            .with_cache(cache.clone())
            .run(&u)
            .unwrap();
        let changed = AnalysisParams {
            min_vote_count: 3,
            ..params()
        };
        Runner::new(changed)
            .with_cache(cache.clone())
            .run(&u)
            .unwrap();
        // Different fingerprints mean distinct entries per instrument.
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_zero_deadline_skips_everything() {
        let runner = Runner::new(params()).with_deadline(Duration::from_secs(0));
        let output = runner.run(&universe()).unwrap();
        assert!(output.ranking.is_empty());
        assert_eq!(output.diagnostics.len(), 3);
        assert!(output
            .diagnostics
            .iter()
            .all(|d| matches!(d.kind, DiagnosticKind::DeadlineSkipped)));
    }

    #[test]
    fn test_tie_break_by_instrument_id() {
        // Two copies of the same series must tie exactly and order by id.
        let values = cyclical(1000, 90.0, 0.08);
        let u = BTreeMap::from([
            ("ZED".to_string(), observations(&values)),
            ("ABC".to_string(), observations(&values)),
        ]);
        let output = Runner::new(params()).run(&u).unwrap();
        assert_eq!(output.ranking.len(), 2);
        assert_eq!(
            output.ranking[0].composite_value,
            output.ranking[1].composite_value
        );
        assert_eq!(output.ranking[0].instrument_id, "ABC");
        assert_eq!(output.ranking[1].instrument_id, "ZED");
    }
}
