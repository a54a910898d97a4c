//! Single-sinusoid least-squares fit at a fixed period.

use std::f64::consts::TAU;

use navcycle_traits::{CycleError, HarmonicFit, Result};

/// Fits `a*sin(wt) + b*cos(wt) + c` to a residual at a fixed period.
///
/// The fit runs on finite samples only (gap markers are ignored) and
/// reports the explained-variance ratio as its quality measure, so a series
/// that really oscillates at the given period scores near 1 and an
/// arrhythmic one near 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarmonicFitter;

impl HarmonicFitter {
    /// Create a new fitter.
    pub const fn new() -> Self {
        Self
    }

    /// Fit the sinusoid at `period` (grid steps).
    pub fn fit(&self, residual: &[f64], period: f64) -> Result<HarmonicFit> {
        if !(period.is_finite() && period > 2.0) {
            return Err(CycleError::Numeric(format!(
                "harmonic fit needs a period above 2 grid steps, got {period}"
            )));
        }
        let samples: Vec<(f64, f64)> = residual
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| (i as f64, v))
            .collect();
        if samples.len() < 8 {
            return Err(CycleError::Numeric(format!(
                "harmonic fit needs at least 8 finite samples, got {}",
                samples.len()
            )));
        }

        let omega = TAU / period;

        // Normal equations for the design [sin(wt), cos(wt), 1].
        let mut ata = [[0.0_f64; 3]; 3];
        let mut aty = [0.0_f64; 3];
        for &(t, y) in &samples {
            let row = [(omega * t).sin(), (omega * t).cos(), 1.0];
            for i in 0..3 {
                for j in 0..3 {
                    ata[i][j] += row[i] * row[j];
                }
                aty[i] += row[i] * y;
            }
        }
        let [a, b, c] = solve3(ata, aty)?;

        let n = samples.len() as f64;
        let mean = samples.iter().map(|(_, y)| y).sum::<f64>() / n;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for &(t, y) in &samples {
            let fitted = a * (omega * t).sin() + b * (omega * t).cos() + c;
            ss_res += (y - fitted) * (y - fitted);
            ss_tot += (y - mean) * (y - mean);
        }
        let fit_quality = if ss_tot < 1e-10 {
            0.0
        } else {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        };

        Ok(HarmonicFit {
            period,
            amplitude: a.hypot(b),
            phase: b.atan2(a),
            fit_quality,
        })
    }
}

/// Solve a symmetric 3x3 system by Gaussian elimination with partial
/// pivoting.
fn solve3(mut a: [[f64; 3]; 3], mut y: [f64; 3]) -> Result<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(CycleError::Numeric(
                "harmonic normal equations are singular".to_string(),
            ));
        }
        a.swap(col, pivot);
        y.swap(col, pivot);
        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            y[row] -= factor * y[col];
        }
    }
    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let mut v = y[row];
        for k in row + 1..3 {
            v -= a[row][k] * x[k];
        }
        x[row] = v / a[row][row];
    }
    Ok(x)
}
