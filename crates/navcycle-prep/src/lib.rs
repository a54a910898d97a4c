//! Series preparation and trend/cycle decomposition for navcycle.
//!
//! This crate turns raw per-instrument observations into analyzable
//! residuals in two stages:
//! - [`SeriesPreparer`] sorts, deduplicates and aligns observations onto a
//!   frequency grid with bounded forward-filling;
//! - [`HpDetrender`] splits the aligned series into a smooth trend and a
//!   cyclical residual via the Hodrick-Prescott filter.

mod detrend;
mod prepare;

// Re-export main types
pub use detrend::{DetrendConfig, HpDetrender, bridge_gaps};
pub use prepare::{PreparerConfig, SeriesPreparer};
