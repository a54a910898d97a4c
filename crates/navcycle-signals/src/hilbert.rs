//! Analytic-signal phase tracking via the Hilbert transform.

use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};

use navcycle_traits::{CycleError, PhaseState, Result, TrackPhase};

use crate::labels::{coherence, label_cycle, persistence, smooth, unwrap_phase};

/// Configuration for the Hilbert phase tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HilbertConfig {
    /// Centered moving-average window applied to the cycle component
    /// before labeling; an odd value keeps the labels aligned.
    pub smoothing: usize,
}

impl Default for HilbertConfig {
    fn default() -> Self {
        Self { smoothing: 5 }
    }
}

/// Tracks instantaneous phase through the analytic signal.
///
/// The analytic signal is built in the frequency domain: forward FFT,
/// doubling of the positive frequencies, zeroing of the negative ones,
/// inverse FFT. The input residual must be gap-free.
#[derive(Debug, Clone)]
pub struct HilbertTracker {
    config: HilbertConfig,
}

impl HilbertTracker {
    /// Create a new tracker with the given configuration.
    pub const fn new(config: HilbertConfig) -> Self {
        Self { config }
    }
}

impl Default for HilbertTracker {
    fn default() -> Self {
        Self::new(HilbertConfig::default())
    }
}

impl TrackPhase for HilbertTracker {
    fn track(&self, residual: &[f64]) -> Result<PhaseState> {
        let n = residual.len();
        if n < 8 {
            return Err(CycleError::Numeric(format!(
                "phase tracking needs at least 8 samples, got {n}"
            )));
        }
        if residual.iter().any(|v| !v.is_finite()) {
            return Err(CycleError::Numeric(
                "phase tracking requires a gap-free residual".to_string(),
            ));
        }

        let mean = residual.iter().sum::<f64>() / n as f64;
        let mut buf: Vec<Complex<f64>> = residual
            .iter()
            .map(|&v| Complex::new(v - mean, 0.0))
            .collect();

        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(n).process(&mut buf);

        // Analytic-signal multiplier: keep DC and Nyquist, double the
        // positive frequencies, drop the negative ones.
        let half = n / 2;
        for (k, value) in buf.iter_mut().enumerate() {
            if k == 0 || (n % 2 == 0 && k == half) {
                continue;
            } else if k < half || (n % 2 == 1 && k == half) {
                *value *= 2.0;
            } else {
                *value = Complex::new(0.0, 0.0);
            }
        }

        planner.plan_fft_inverse(n).process(&mut buf);
        let scale = 1.0 / n as f64;

        let mut wrapped = Vec::with_capacity(n);
        let mut amplitude = Vec::with_capacity(n);
        let mut cycle = Vec::with_capacity(n);
        for value in &buf {
            let z = *value * scale;
            wrapped.push(z.im.atan2(z.re));
            amplitude.push(z.norm());
            cycle.push(z.re);
        }

        let phase = unwrap_phase(&wrapped);
        let coherence = coherence(&phase);
        let persistence = persistence(&cycle);
        let smoothed = smooth(&cycle, self.config.smoothing);
        let labels = label_cycle(&smoothed, &amplitude);

        Ok(PhaseState {
            phase,
            amplitude,
            cycle,
            labels,
            coherence,
            persistence,
        })
    }

    fn name(&self) -> &str {
        "hilbert"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcycle_traits::CycleLabel;
    use std::f64::consts::TAU;

    #[test]
    fn test_sine_has_coherent_forward_phase() {
        let period = 50.0;
        let residual: Vec<f64> = (0..500)
            .map(|i| (TAU * i as f64 / period).sin())
            .collect();
        let state = HilbertTracker::default().track(&residual).unwrap();
        assert!(state.coherence > 0.95, "coherence {}", state.coherence);
        assert!(state.persistence > 0.95, "persistence {}", state.persistence);
        // Unwrapped phase advances by ~2*pi per period.
        let total = state.phase[499] - state.phase[0];
        let cycles = total / TAU;
        assert!((cycles - 499.0 / period).abs() < 0.5, "cycles {cycles}");
    }

    #[test]
    fn test_sine_amplitude_envelope_flat() {
        let residual: Vec<f64> = (0..400)
            .map(|i| 3.0 * (TAU * i as f64 / 40.0).sin())
            .collect();
        let state = HilbertTracker::default().track(&residual).unwrap();
        // Away from the boundary the envelope sits near the amplitude.
        for &a in &state.amplitude[50..350] {
            assert!((a - 3.0).abs() < 0.3, "envelope {a}");
        }
    }

    #[test]
    fn test_troughs_land_near_sine_minima() {
        let period = 40;
        let residual: Vec<f64> = (0..400)
            .map(|i| (TAU * i as f64 / period as f64).sin())
            .collect();
        let state = HilbertTracker::default().track(&residual).unwrap();
        let troughs: Vec<usize> = state
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == CycleLabel::Trough)
            .map(|(i, _)| i)
            .collect();
        assert!(!troughs.is_empty());
        // sin minima fall at 30, 70, 110, ... for a 40-step period.
        for idx in troughs {
            let position = (idx + 10) % period;
            assert!(
                position <= 3 || position >= period - 3,
                "trough at {idx} far from a minimum"
            );
        }
    }

    #[test]
    fn test_noise_scores_less_coherent_than_sine() {
        let sine: Vec<f64> = (0..500)
            .map(|i| (TAU * i as f64 / 60.0).sin())
            .collect();
        let noise: Vec<f64> = (0..500)
            .map(|i| ((i as f64 * 12.9898).sin() * 43758.5453).fract() - 0.5)
            .collect();
        let tracker = HilbertTracker::default();
        let coherent = tracker.track(&sine).unwrap();
        let incoherent = tracker.track(&noise).unwrap();
        assert!(coherent.coherence > incoherent.coherence);
    }

    #[test]
    fn test_gap_marker_rejected() {
        let mut residual: Vec<f64> = (0..100).map(|i| (i as f64 / 10.0).sin()).collect();
        residual[50] = f64::NAN;
        assert!(HilbertTracker::default().track(&residual).is_err());
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(HilbertTracker::default().track(&[1.0, 2.0]).is_err());
    }
}
