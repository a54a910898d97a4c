//! Shared helpers for phase trackers: unwrapping, increment diagnostics
//! and cycle-position labeling.

use std::f64::consts::{PI, TAU};

use navcycle_traits::CycleLabel;

/// Amplitude below this multiple of the envelope maximum is treated as
/// noise and labeled Undetermined.
const AMPLITUDE_FLOOR_RATIO: f64 = 1e-4;

/// Unwrap a wrapped phase sequence so consecutive steps stay within pi.
pub(crate) fn unwrap_phase(wrapped: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(wrapped.len());
    let mut prev_raw = f64::NAN;
    let mut prev_out = 0.0;
    for (i, &p) in wrapped.iter().enumerate() {
        if i == 0 {
            out.push(p);
            prev_raw = p;
            prev_out = p;
            continue;
        }
        let mut d = p - prev_raw;
        d -= TAU * (d / TAU).round();
        if d > PI {
            d -= TAU;
        } else if d < -PI {
            d += TAU;
        }
        prev_out += d;
        out.push(prev_out);
        prev_raw = p;
    }
    out
}

/// Coherence: mean resultant length of phase increments, in [0, 1].
///
/// A steady rotation scores 1; a phase that jumps around scores near 0.
pub(crate) fn coherence(phase: &[f64]) -> f64 {
    if phase.len() < 2 {
        return 0.0;
    }
    let mut sum_cos = 0.0;
    let mut sum_sin = 0.0;
    let steps = phase.len() - 1;
    for w in phase.windows(2) {
        let d = w[1] - w[0];
        sum_cos += d.cos();
        sum_sin += d.sin();
    }
    (sum_cos.hypot(sum_sin) / steps as f64).clamp(0.0, 1.0)
}

/// Persistence: lag-1 autocorrelation of the cycle component, clamped to
/// [0, 1]. White noise scores ~0, a slow oscillation near 1.
pub(crate) fn persistence(cycle: &[f64]) -> f64 {
    let n = cycle.len();
    if n < 3 {
        return 0.0;
    }
    let mean = cycle.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        let d = cycle[i] - mean;
        den += d * d;
        if i + 1 < n {
            num += d * (cycle[i + 1] - mean);
        }
    }
    if den < 1e-10 {
        return 0.0;
    }
    (num / den).clamp(0.0, 1.0)
}

/// Label each point by the local direction of the cycle component.
///
/// A trough is a strict local minimum of the cycle, a peak a strict local
/// maximum; otherwise the forward difference decides Rising or Falling.
/// Boundary points and points under the amplitude floor are Undetermined.
pub(crate) fn label_cycle(cycle: &[f64], amplitude: &[f64]) -> Vec<CycleLabel> {
    let n = cycle.len();
    let mut labels = vec![CycleLabel::Undetermined; n];
    if n < 3 {
        return labels;
    }
    let floor = amplitude
        .iter()
        .copied()
        .fold(0.0_f64, f64::max)
        * AMPLITUDE_FLOOR_RATIO;
    for i in 1..n - 1 {
        if amplitude[i] < floor {
            continue;
        }
        let d_prev = cycle[i] - cycle[i - 1];
        let d_next = cycle[i + 1] - cycle[i];
        labels[i] = if d_prev < 0.0 && d_next > 0.0 {
            CycleLabel::Trough
        } else if d_prev > 0.0 && d_next < 0.0 {
            CycleLabel::Peak
        } else if d_next > 0.0 {
            CycleLabel::Rising
        } else if d_next < 0.0 {
            CycleLabel::Falling
        } else {
            CycleLabel::Undetermined
        };
    }
    labels
}

/// Centered moving average with an odd window; the ends shrink the window
/// symmetrically.
pub(crate) fn smooth(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if window <= 1 || n == 0 {
        return values.to_vec();
    }
    let half = window / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let reach = half.min(i).min(n - 1 - i);
        let lo = i - reach;
        let hi = i + reach;
        let slice = &values[lo..=hi];
        out.push(slice.iter().sum::<f64>() / slice.len() as f64);
    }
    out
}
