//! Damped stochastic-cycle phase tracking via a Kalman filter.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use navcycle_traits::{CycleError, PhaseState, Result, TrackPhase};

use crate::labels::{coherence, label_cycle, persistence, smooth, unwrap_phase};

/// Configuration for the state-space phase tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpaceConfig {
    /// Oscillation period of the cycle state, in grid steps.
    pub period: f64,
    /// Damping factor in (0, 1); closer to 1 holds the cycle longer.
    pub damping: f64,
    /// Share of the residual variance attributed to the cycle state.
    pub signal_share: f64,
    /// Centered moving-average window applied before labeling.
    pub smoothing: usize,
}

impl Default for StateSpaceConfig {
    fn default() -> Self {
        Self {
            period: 60.0,
            damping: 0.94,
            signal_share: 0.5,
            smoothing: 5,
        }
    }
}

/// Tracks the cycle as a damped stochastic oscillator.
///
/// State `(c, c*)` rotates by `2*pi/period` each step under damping `rho`;
/// the observation is `c` plus noise. The filtered state pair yields both
/// the cycle component and its instantaneous phase. Unlike the Hilbert
/// tracker this is strictly causal: the estimate at `t` uses data up to
/// `t` only.
#[derive(Debug, Clone)]
pub struct StateSpaceTracker {
    config: StateSpaceConfig,
}

impl StateSpaceTracker {
    /// Create a new tracker with the given configuration.
    pub const fn new(config: StateSpaceConfig) -> Self {
        Self { config }
    }
}

impl Default for StateSpaceTracker {
    fn default() -> Self {
        Self::new(StateSpaceConfig::default())
    }
}

impl TrackPhase for StateSpaceTracker {
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
        let var = residual
            .iter()
            .map(|&v| (v - mean) * (v - mean))
            .sum::<f64>()
            / n as f64;
        if var < 1e-10 {
            return Err(CycleError::Numeric(
                "residual is constant, no cycle to track".to_string(),
            ));
        }

        let rho = self.config.damping;
        let lambda = TAU / self.config.period;
        let (cos_l, sin_l) = (lambda.cos(), lambda.sin());
        // Transition: x_t = rho * R(lambda) x_{t-1} + w_t.
        let f = [
            [rho * cos_l, rho * sin_l],
            [-rho * sin_l, rho * cos_l],
        ];
        // Stationary cycle variance q / (1 - rho^2) pinned to the signal
        // share of the observed variance.
        let q = (1.0 - rho * rho) * var * self.config.signal_share;
        let r = var * (1.0 - self.config.signal_share).max(1e-6);

        let mut x = [0.0_f64, 0.0_f64];
        let mut p = [[var, 0.0], [0.0, var]];

        let mut cycle = Vec::with_capacity(n);
        let mut companion = Vec::with_capacity(n);
        for &y in residual {
            // Predict.
            let x_pred = [
                f[0][0] * x[0] + f[0][1] * x[1],
                f[1][0] * x[0] + f[1][1] * x[1],
            ];
            // P_pred = F P F' + Q.
            let fp = [
                [
                    f[0][0] * p[0][0] + f[0][1] * p[1][0],
                    f[0][0] * p[0][1] + f[0][1] * p[1][1],
                ],
                [
                    f[1][0] * p[0][0] + f[1][1] * p[1][0],
                    f[1][0] * p[0][1] + f[1][1] * p[1][1],
                ],
            ];
            let mut p_pred = [
                [
                    fp[0][0] * f[0][0] + fp[0][1] * f[0][1] + q,
                    fp[0][0] * f[1][0] + fp[0][1] * f[1][1],
                ],
                [
                    fp[1][0] * f[0][0] + fp[1][1] * f[0][1],
                    fp[1][0] * f[1][0] + fp[1][1] * f[1][1] + q,
                ],
            ];

            // Update against the scalar observation y = c + eps.
            let s = p_pred[0][0] + r;
            let k = [p_pred[0][0] / s, p_pred[1][0] / s];
            let innovation = (y - mean) - x_pred[0];
            x = [x_pred[0] + k[0] * innovation, x_pred[1] + k[1] * innovation];
            let row0 = p_pred[0];
            p_pred[0][0] -= k[0] * row0[0];
            p_pred[0][1] -= k[0] * row0[1];
            p_pred[1][0] -= k[1] * row0[0];
            p_pred[1][1] -= k[1] * row0[1];
            p = p_pred;

            cycle.push(x[0]);
            companion.push(x[1]);
        }

        let wrapped: Vec<f64> = cycle
            .iter()
            .zip(&companion)
            .map(|(&c, &cs)| (-cs).atan2(c))
            .collect();
        let amplitude: Vec<f64> = cycle
            .iter()
            .zip(&companion)
            .map(|(&c, &cs)| c.hypot(cs))
            .collect();

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
        "state_space"
    }
}
