#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/navcycle/navcycle/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core types and trait definitions for the navcycle cyclicality engine.
//!
//! This crate provides the records, error taxonomy, parameter bundle and
//! trait seams shared by every pipeline stage.

/// The version of the navcycle-traits crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Module declarations
pub mod error;
pub mod params;
pub mod signal;
pub mod types;

// Re-exports
pub use error::{CycleError, Diagnostic, DiagnosticKind, Result, SkipReason};
pub use params::{AnalysisParams, PeriodBand, PhaseModelKind, SpectralWindow};
pub use signal::{Decompose, TrackPhase};
pub use types::{
    BacktestRecord, BacktestSummary, CompositeScore, CycleLabel, Date, DecomposedSeries, Evidence,
    Frequency, HarmonicFit, InstrumentId, PhaseState, PreparedSeries, RawObservation, SignalKind,
    SpectralProfile, StageOutcome, TurningPoint, TurningPointKind,
};
