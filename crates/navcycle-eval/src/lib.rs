//! Pipeline orchestration, backtesting, caching and output tables for
//! navcycle.
//!
//! This crate ties the analysis stages together:
//! - [`InstrumentPipeline`] runs the full chain for one instrument;
//! - [`Runner`] fans the pipeline out over a worker pool with caching,
//!   deadline handling and deterministic ranking;
//! - [`Backtester`] evaluates the forward profitability of confirmed
//!   troughs;
//! - [`tables`] renders the run output as Polars DataFrames.

pub mod backtest;
pub mod cache;
pub mod pipeline;
pub mod runner;
pub mod tables;

// Re-export main types
pub use backtest::{BacktestConfig, Backtester};
pub use cache::{AnalysisCache, CacheKey, JsonDirCache, MemoryCache, data_fingerprint};
pub use pipeline::{InstrumentOutcome, InstrumentPipeline, InstrumentRecord};
pub use runner::{RunOutput, Runner};
