//! Spectral, harmonic and phase-tracking estimators for navcycle.
//!
//! Three independent reads on the same detrended residual:
//! - [`SpectralEstimator`] measures how concentrated in-band power is
//!   around a dominant period (FFT periodogram, Lomb-Scargle for gapped
//!   series);
//! - [`HarmonicFitter`] fits a single sinusoid at the dominant period and
//!   reports its explained variance;
//! - [`HilbertTracker`] and [`StateSpaceTracker`] locate each point within
//!   its cycle and measure how stable that cycle's phase is.

mod harmonic;
mod hilbert;
mod labels;
mod spectrum;
mod state_space;

// Re-export main types
pub use harmonic::HarmonicFitter;
pub use hilbert::{HilbertConfig, HilbertTracker};
pub use spectrum::{SpectrumConfig, SpectralEstimator};
pub use state_space::{StateSpaceConfig, StateSpaceTracker};

use navcycle_traits::{AnalysisParams, PhaseModelKind, TrackPhase};

/// Build the phase tracker selected by the parameter bundle.
pub fn phase_tracker(params: &AnalysisParams) -> Box<dyn TrackPhase> {
    match params.phase_model {
        PhaseModelKind::Hilbert => Box::new(HilbertTracker::default()),
        PhaseModelKind::StateSpace => Box::new(StateSpaceTracker::new(StateSpaceConfig {
            period: params.state_space_period,
            damping: params.state_space_damping,
            ..StateSpaceConfig::default()
        })),
    }
}
