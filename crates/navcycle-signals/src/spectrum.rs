//! Periodogram-based estimation of the dominant cycle period.

use std::f64::consts::TAU;

use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use navcycle_traits::{
    PeriodBand, Result, SkipReason, SpectralProfile, SpectralWindow, StageOutcome,
};

/// Bins on each side of the peak integrated as the main lobe.
const MAIN_LOBE_HALF_WIDTH: usize = 2;

/// Frequency oversampling factor of the Lomb-Scargle grid.
const LOMB_OVERSAMPLE: f64 = 4.0;

/// Configuration for spectral estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumConfig {
    /// Period search band, in grid steps.
    pub band: PeriodBand,
    /// Taper applied before the FFT periodogram.
    pub window: SpectralWindow,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            band: PeriodBand::default(),
            window: SpectralWindow::Hann,
        }
    }
}

/// Estimates where in-band spectral power concentrates.
///
/// Gap-free residuals go through a tapered FFT periodogram with parabolic
/// peak refinement; residuals with remaining gap markers fall back to a
/// Lomb-Scargle periodogram over the observed samples only.
#[derive(Debug, Clone)]
pub struct SpectralEstimator {
    config: SpectrumConfig,
}

impl SpectralEstimator {
    /// Create a new estimator with the given configuration.
    pub const fn new(config: SpectrumConfig) -> Self {
        Self { config }
    }

    /// Estimate the spectral profile of a gap-free residual.
    pub fn estimate(&self, residual: &[f64]) -> Result<StageOutcome<SpectralProfile>> {
        let n = residual.len();
        let min_len = (2.0 * self.config.band.min).ceil() as usize;
        if n < min_len {
            return Ok(StageOutcome::Skipped(SkipReason::TooShortForSpectral {
                len: n,
                min_len,
            }));
        }

        let mean = residual.iter().sum::<f64>() / n as f64;
        let mut buf: Vec<Complex<f64>> = residual
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let w = match self.config.window {
                    SpectralWindow::Hann => 0.5 * (1.0 - (TAU * i as f64 / n as f64).cos()),
                    SpectralWindow::Boxcar => 1.0,
                };
                Complex::new((v - mean) * w, 0.0)
            })
            .collect();

        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(n).process(&mut buf);

        // One-sided power spectrum; the scale constant cancels in the
        // strength ratio.
        let half = n / 2;
        let power: Vec<f64> = (0..=half).map(|k| buf[k].norm_sqr() / n as f64).collect();

        // In-band bins: period n/k inside [band.min, band.max].
        let k_lo = ((n as f64 / self.config.band.max).ceil() as usize).max(1);
        let k_hi = ((n as f64 / self.config.band.min).floor() as usize).min(half);
        if k_lo > k_hi {
            return Ok(StageOutcome::Skipped(SkipReason::TooShortForSpectral {
                len: n,
                min_len,
            }));
        }

        let mut peak_k = k_lo;
        let mut total_band_power = 0.0;
        for k in k_lo..=k_hi {
            total_band_power += power[k];
            if power[k] > power[peak_k] {
                peak_k = k;
            }
        }
        if total_band_power <= 0.0 {
            return Ok(StageOutcome::Ready(SpectralProfile {
                dominant_period: n as f64 / peak_k as f64,
                power_at_dominant: 0.0,
                total_band_power: 0.0,
                normalized_strength: 0.0,
            }));
        }

        // Parabolic interpolation sharpens the period estimate beyond the
        // bin resolution.
        let refined_k = if peak_k > 0 && peak_k < half {
            peak_k as f64 + parabolic_offset(power[peak_k - 1], power[peak_k], power[peak_k + 1])
        } else {
            peak_k as f64
        };
        let dominant_period = n as f64 / refined_k;

        let lobe_lo = peak_k.saturating_sub(MAIN_LOBE_HALF_WIDTH).max(1);
        let lobe_hi = (peak_k + MAIN_LOBE_HALF_WIDTH).min(half);
        let power_at_dominant: f64 = power[lobe_lo..=lobe_hi].iter().sum();
        let normalized_strength = (power_at_dominant / total_band_power).clamp(0.0, 1.0);

        debug!(
            n,
            peak_k, dominant_period, normalized_strength, "periodogram peak"
        );

        Ok(StageOutcome::Ready(SpectralProfile {
            dominant_period,
            power_at_dominant,
            total_band_power,
            normalized_strength,
        }))
    }

    /// Lomb-Scargle fallback for residuals with remaining gap markers.
    ///
    /// `residual` may contain NaN; only finite samples (at their grid
    /// offsets) enter the estimate.
    pub fn estimate_irregular(&self, residual: &[f64]) -> Result<StageOutcome<SpectralProfile>> {
        let samples: Vec<(f64, f64)> = residual
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| (i as f64, v))
            .collect();
        let m = samples.len();
        let min_len = (2.0 * self.config.band.min).ceil() as usize;
        if m < min_len {
            return Ok(StageOutcome::Skipped(SkipReason::TooShortForSpectral {
                len: m,
                min_len,
            }));
        }

        let mean = samples.iter().map(|(_, v)| v).sum::<f64>() / m as f64;
        let span = samples[m - 1].0 - samples[0].0;
        let f_lo = 1.0 / self.config.band.max;
        let f_hi = 1.0 / self.config.band.min;
        let n_freq = ((f_hi - f_lo) * span * LOMB_OVERSAMPLE).ceil().max(16.0) as usize;
        let df = (f_hi - f_lo) / n_freq as f64;

        let mut power = Vec::with_capacity(n_freq + 1);
        for j in 0..=n_freq {
            let omega = TAU * (f_lo + df * j as f64);
            power.push(lomb_power(&samples, mean, omega));
        }

        let mut peak = 0;
        let mut total_band_power = 0.0;
        for (j, &p) in power.iter().enumerate() {
            total_band_power += p;
            if p > power[peak] {
                peak = j;
            }
        }
        if total_band_power <= 0.0 {
            return Ok(StageOutcome::Ready(SpectralProfile {
                dominant_period: 1.0 / (f_lo + df * peak as f64),
                power_at_dominant: 0.0,
                total_band_power: 0.0,
                normalized_strength: 0.0,
            }));
        }

        let refined_j = if peak > 0 && peak < n_freq {
            peak as f64 + parabolic_offset(power[peak - 1], power[peak], power[peak + 1])
        } else {
            peak as f64
        };
        let dominant_period = 1.0 / (f_lo + df * refined_j);

        // The oversampled grid correlates adjacent estimates, so the lobe
        // width scales with the oversampling factor.
        let lobe_half = (MAIN_LOBE_HALF_WIDTH as f64 * LOMB_OVERSAMPLE) as usize;
        let lobe_lo = peak.saturating_sub(lobe_half);
        let lobe_hi = (peak + lobe_half).min(n_freq);
        let power_at_dominant: f64 = power[lobe_lo..=lobe_hi].iter().sum();
        let normalized_strength = (power_at_dominant / total_band_power).clamp(0.0, 1.0);

        Ok(StageOutcome::Ready(SpectralProfile {
            dominant_period,
            power_at_dominant,
            total_band_power,
            normalized_strength,
        }))
    }
}

/// Scargle's periodogram ordinate at angular frequency `omega`.
fn lomb_power(samples: &[(f64, f64)], mean: f64, omega: f64) -> f64 {
    let mut sin2 = 0.0;
    let mut cos2 = 0.0;
    for &(t, _) in samples {
        let a = 2.0 * omega * t;
        sin2 += a.sin();
        cos2 += a.cos();
    }
    let tau_offset = sin2.atan2(cos2) / (2.0 * omega);

    let mut yc = 0.0;
    let mut ys = 0.0;
    let mut cc = 0.0;
    let mut ss = 0.0;
    for &(t, y) in samples {
        let arg = omega * (t - tau_offset);
        let c = arg.cos();
        let s = arg.sin();
        let dy = y - mean;
        yc += dy * c;
        ys += dy * s;
        cc += c * c;
        ss += s * s;
    }
    let mut p = 0.0;
    if cc > 0.0 {
        p += yc * yc / cc;
    }
    if ss > 0.0 {
        p += ys * ys / ss;
    }
    0.5 * p
}

/// Offset in [-0.5, 0.5] of a parabola's vertex through three samples.
fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}
