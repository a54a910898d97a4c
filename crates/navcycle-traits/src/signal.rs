//! Trait seams for the pipeline's numerical stages.
//!
//! Only two stages admit genuinely interchangeable treatments: the
//! trend/cycle split and the phase tracker. Everything else is a concrete
//! struct; these seams exist so an alternate detrender or phase model plugs
//! in without touching the pipeline.

use crate::error::Result;
use crate::types::{DecomposedSeries, PhaseState, PreparedSeries};

/// Splits a prepared series into trend and cyclical residual.
///
/// Implementations must uphold the reconstruction invariant: at every
/// finite grid point, `trend + residual` equals the (possibly
/// log-transformed) input within 1e-9 relative tolerance.
pub trait Decompose: Send + Sync {
    /// Compute the trend/residual split.
    fn decompose(&self, series: &PreparedSeries) -> Result<DecomposedSeries>;

    /// A short identifier for logs and diagnostics.
    fn name(&self) -> &str;
}

/// Tracks instantaneous phase and amplitude of a cyclical residual.
///
/// The input residual must be gap-free (the pipeline hands trackers the
/// interpolated residual); implementations may assume finite values.
pub trait TrackPhase: Send + Sync {
    /// Compute phase, amplitude, cycle component and position labels.
    fn track(&self, residual: &[f64]) -> Result<PhaseState>;

    /// A short identifier for logs and diagnostics.
    fn name(&self) -> &str;
}
