//! Forward-return evaluation of confirmed troughs.

use serde::{Deserialize, Serialize};

use navcycle_traits::{
    BacktestRecord, BacktestSummary, PreparedSeries, TurningPoint, TurningPointKind,
};

/// Configuration for the trough backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Holding horizons, in grid steps.
    pub horizons: Vec<usize>,
    /// Round-trip transaction cost subtracted from each forward return.
    pub transaction_cost: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            horizons: vec![63, 126, 252],
            transaction_cost: 0.0,
        }
    }
}

/// Measures whether buying confirmed troughs would have paid.
///
/// For each trough and horizon with a full forward window and finite
/// prices at both ends, the net forward return is
/// `price[t + h] / price[t] - 1 - cost`. Troughs whose window runs past
/// the end of the series are excluded from that horizon's statistics
/// rather than truncated.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    /// Create a new backtester with the given configuration.
    pub const fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Evaluate one instrument's confirmed troughs.
    pub fn run(
        &self,
        series: &PreparedSeries,
        turning_points: &[TurningPoint],
    ) -> (Vec<BacktestRecord>, Vec<BacktestSummary>) {
        let mut records = Vec::new();
        let mut summaries = Vec::new();
        let n = series.values.len();

        for &horizon in &self.config.horizons {
            let mut returns = Vec::new();
            for point in turning_points {
                if point.kind != TurningPointKind::Trough {
                    continue;
                }
                let t = point.index;
                let Some(exit) = t.checked_add(horizon).filter(|&j| j < n) else {
                    continue;
                };
                let entry_price = series.values[t];
                let exit_price = series.values[exit];
                if !entry_price.is_finite() || !exit_price.is_finite() || entry_price <= 0.0 {
                    continue;
                }
                let forward_return =
                    exit_price / entry_price - 1.0 - self.config.transaction_cost;
                returns.push(forward_return);
                records.push(BacktestRecord {
                    instrument_id: series.instrument_id.clone(),
                    trough_date: point.date,
                    horizon,
                    forward_return,
                    hit: forward_return > 0.0,
                });
            }
            if returns.is_empty() {
                continue;
            }
            let signals = returns.len();
            let hits = returns.iter().filter(|&&r| r > 0.0).count();
            let mean_return = returns.iter().sum::<f64>() / signals as f64;
            summaries.push(BacktestSummary {
                instrument_id: series.instrument_id.clone(),
                horizon,
                signals,
                hit_rate: hits as f64 / signals as f64,
                mean_return,
                median_return: median(&mut returns),
            });
        }

        (records, summaries)
    }
}

/// Median of a non-empty slice; sorts in place.
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
