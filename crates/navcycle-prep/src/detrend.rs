//! Trend/cycle decomposition via the Hodrick-Prescott filter.

use serde::{Deserialize, Serialize};
use tracing::warn;

use navcycle_traits::{CycleError, Decompose, DecomposedSeries, PreparedSeries, Result};

/// Fewest finite points the pentadiagonal filter accepts; shorter series
/// degrade to a mean trend.
const MIN_FILTER_POINTS: usize = 12;

/// Configuration for the Hodrick-Prescott detrender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetrendConfig {
    /// Smoothing parameter; larger values make the trend stiffer.
    pub lambda: f64,
    /// Detrend log values when every value is strictly positive.
    pub log_transform: bool,
}

impl Default for DetrendConfig {
    fn default() -> Self {
        Self {
            lambda: 129_600.0,
            log_transform: true,
        }
    }
}

/// Splits a prepared series into a smooth trend and a cyclical residual.
///
/// The filter solves `(I + lambda * D'D) tau = y` exactly, where `D` is the
/// second-difference operator, via a symmetric banded Cholesky
/// factorization. Gap markers are bridged by linear interpolation for the
/// solve only; the residual stays NaN wherever the input had a gap.
#[derive(Debug, Clone)]
pub struct HpDetrender {
    config: DetrendConfig,
}

impl HpDetrender {
    /// Create a new detrender with the given configuration.
    pub const fn new(config: DetrendConfig) -> Self {
        Self { config }
    }
}

impl Default for HpDetrender {
    fn default() -> Self {
        Self::new(DetrendConfig::default())
    }
}

impl Decompose for HpDetrender {
    fn decompose(&self, series: &PreparedSeries) -> Result<DecomposedSeries> {
        if series.is_empty() {
            return Err(CycleError::Numeric(
                "cannot decompose an empty series".to_string(),
            ));
        }

        let all_positive = series
            .values
            .iter()
            .all(|v| !v.is_finite() || *v > 0.0);
        let log_applied = self.config.log_transform && all_positive;
        if self.config.log_transform && !all_positive {
            warn!(
                instrument_id = series.instrument_id.as_str(),
                "non-positive values present, detrending raw levels"
            );
        }

        let y: Vec<f64> = series
            .values
            .iter()
            .map(|&v| {
                if v.is_finite() && log_applied {
                    v.ln()
                } else {
                    v
                }
            })
            .collect();

        let finite_count = y.iter().filter(|v| v.is_finite()).count();
        if finite_count == 0 {
            return Err(CycleError::Numeric(
                "no finite values to decompose".to_string(),
            ));
        }

        if finite_count < MIN_FILTER_POINTS {
            let mean =
                y.iter().filter(|v| v.is_finite()).sum::<f64>() / finite_count as f64;
            let trend = vec![mean; y.len()];
            let residual: Vec<f64> = y
                .iter()
                .map(|&v| if v.is_finite() { v - mean } else { f64::NAN })
                .collect();
            return Ok(DecomposedSeries {
                trend,
                residual,
                log_applied,
                null_trend: true,
            });
        }

        let bridged = bridge_gaps(&y);
        let trend = hp_filter(&bridged, self.config.lambda)?;
        let residual: Vec<f64> = y
            .iter()
            .zip(&trend)
            .map(|(&v, &t)| if v.is_finite() { v - t } else { f64::NAN })
            .collect();

        Ok(DecomposedSeries {
            trend,
            residual,
            log_applied,
            null_trend: false,
        })
    }

    fn name(&self) -> &str {
        "hodrick_prescott"
    }
}

/// Replace NaN runs by linear interpolation between finite neighbors;
/// leading and trailing runs carry the nearest finite value.
///
/// The filter solves on the bridged series; phase trackers use the same
/// bridging to obtain a gap-free residual.
pub fn bridge_gaps(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut out = values.to_vec();
    let mut i = 0;
    while i < n {
        if out[i].is_finite() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < n && !out[i].is_finite() {
            i += 1;
        }
        let left = run_start.checked_sub(1).map(|j| out[j]);
        let right = if i < n { Some(out[i]) } else { None };
        match (left, right) {
            (Some(l), Some(r)) => {
                let span = (i - run_start + 1) as f64;
                for (k, slot) in out[run_start..i].iter_mut().enumerate() {
                    let w = (k + 1) as f64 / span;
                    *slot = l + (r - l) * w;
                }
            }
            (Some(l), None) => out[run_start..i].fill(l),
            (None, Some(r)) => out[run_start..i].fill(r),
            (None, None) => {}
        }
    }
    out
}

/// Hodrick-Prescott trend: solve `(I + lambda * D'D) tau = y` with a
/// banded Cholesky factorization (bandwidth 2).
fn hp_filter(y: &[f64], lambda: f64) -> Result<Vec<f64>> {
    let n = y.len();
    if n < 3 {
        return Ok(y.to_vec());
    }

    // Pentadiagonal coefficients of I + lambda * D'D.
    let mut diag = vec![0.0; n];
    let mut off1 = vec![0.0; n.saturating_sub(1)];
    let mut off2 = vec![0.0; n.saturating_sub(2)];
    for i in 0..n {
        let c = if i == 0 || i == n - 1 {
            1.0
        } else if i == 1 || i == n - 2 {
            5.0
        } else {
            6.0
        };
        diag[i] = 1.0 + lambda * c;
    }
    for i in 0..n - 1 {
        let c = if i == 0 || i == n - 2 { -2.0 } else { -4.0 };
        off1[i] = lambda * c;
    }
    for slot in &mut off2 {
        *slot = lambda;
    }

    // Cholesky in band storage: l0 diagonal, l1 first subdiagonal,
    // l2 second subdiagonal.
    let mut l0 = vec![0.0; n];
    let mut l1 = vec![0.0; n.saturating_sub(1)];
    let mut l2 = vec![0.0; n.saturating_sub(2)];
    for i in 0..n {
        let mut a = diag[i];
        if i >= 1 {
            a -= l1[i - 1] * l1[i - 1];
        }
        if i >= 2 {
            a -= l2[i - 2] * l2[i - 2];
        }
        if a <= 0.0 {
            return Err(CycleError::Numeric(
                "trend filter system lost positive definiteness".to_string(),
            ));
        }
        l0[i] = a.sqrt();
        if i + 1 < n {
            let mut b = off1[i];
            if i >= 1 {
                b -= l1[i - 1] * l2[i - 1];
            }
            l1[i] = b / l0[i];
        }
        if i + 2 < n {
            l2[i] = off2[i] / l0[i];
        }
    }

    // Forward substitution L z = y.
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut v = y[i];
        if i >= 1 {
            v -= l1[i - 1] * z[i - 1];
        }
        if i >= 2 {
            v -= l2[i - 2] * z[i - 2];
        }
        z[i] = v / l0[i];
    }

    // Back substitution L' tau = z.
    let mut tau = vec![0.0; n];
    for i in (0..n).rev() {
        let mut v = z[i];
        if i + 1 < n {
            v -= l1[i] * tau[i + 1];
        }
        if i + 2 < n {
            v -= l2[i] * tau[i + 2];
        }
        tau[i] = v / l0[i];
    }

    Ok(tau)
}
