//! Turning-point detection and composite scoring for navcycle.
//!
//! [`TurningPointDetector`] confirms or rejects the extrema candidates the
//! phase tracker labeled, and [`ScoreAggregator`] folds the component
//! signals into one guarded composite score per instrument.

mod aggregate;
mod turning;

// Re-export main types
pub use aggregate::{AggregatorConfig, ComponentInputs, ScoreAggregator};
pub use turning::{TurningConfig, TurningPointDetector};
