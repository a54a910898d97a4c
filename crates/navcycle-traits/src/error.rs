//! Error taxonomy for the navcycle engine.
//!
//! Conditions fall into three classes with different handling:
//! - Skip conditions ([`SkipReason`]) describe an instrument that cannot be
//!   analyzed. They are ordinary data, surfaced as [`Diagnostic`] entries,
//!   and never abort a run.
//! - Fatal per-instrument conditions ([`CycleError`]) record the failure and
//!   let the rest of the universe proceed (or abort the run under
//!   fail-fast).
//! - Configuration errors reject the run before any per-instrument work.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::InstrumentId;

/// The main error type for navcycle operations.
#[derive(Debug, Error)]
pub enum CycleError {
    /// A run parameter failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input records that cannot be interpreted at all.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A numerical routine failed (non-finite intermediate, singular
    /// system, failed factorization).
    #[error("Numeric failure: {0}")]
    Numeric(String),

    /// Error from Polars operations.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// Error serializing or deserializing a record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the cache or the table writers.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

impl From<String> for CycleError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for CycleError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

/// A specialized Result type for navcycle operations.
pub type Result<T> = std::result::Result<T, CycleError>;

/// Why an instrument (or a pipeline stage) was skipped.
///
/// Skips are expected outcomes, not errors: a skipped instrument appears in
/// the diagnostics list and is absent from the ranking, and the run
/// continues.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No observations remain after cleaning.
    #[error("no observations after cleaning")]
    EmptyInput,

    /// Fewer observed points than the configured minimum history.
    #[error("insufficient history: {observed} observed, {required} required")]
    InsufficientHistory {
        /// Number of observed (non-filled) grid points.
        observed: usize,
        /// Configured `min_history`.
        required: usize,
    },

    /// The ingest stream's timestamps decrease and cannot be repaired.
    #[error("timestamps are not monotonically increasing")]
    NonMonotonicTimestamps,

    /// Too much of the series had to be filled to trust the analysis.
    #[error("filled fraction {fraction:.3} exceeds ceiling {ceiling:.3}")]
    ExcessiveFill {
        /// Fraction of grid points that were forward-filled.
        fraction: f64,
        /// Configured `max_fill_fraction`.
        ceiling: f64,
    },

    /// The residual is too short to resolve any period in the search band.
    #[error("series too short for spectral estimation: {len} points, {min_len} required")]
    TooShortForSpectral {
        /// Residual length available to the estimator.
        len: usize,
        /// Minimum length (twice the shortest period in the band).
        min_len: usize,
    },
}

/// What happened to an instrument that produced no ranking row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The instrument was skipped for a structural reason.
    Skipped {
        /// The structural reason.
        reason: SkipReason,
    },
    /// A pipeline stage failed fatally for this instrument.
    Failed {
        /// Rendered error message.
        message: String,
    },
    /// The run deadline expired before this instrument's task started.
    DeadlineSkipped,
}

/// One diagnostics-list entry: an instrument and why it has no score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The instrument the entry refers to.
    pub instrument_id: InstrumentId,
    /// What happened.
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    /// Build a skip entry.
    pub const fn skipped(instrument_id: InstrumentId, reason: SkipReason) -> Self {
        Self {
            instrument_id,
            kind: DiagnosticKind::Skipped { reason },
        }
    }

    /// Build a failure entry from any error.
    pub fn failed(instrument_id: InstrumentId, error: &CycleError) -> Self {
        Self {
            instrument_id,
            kind: DiagnosticKind::Failed {
                message: error.to_string(),
            },
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DiagnosticKind::Skipped { reason } => {
                write!(f, "{}: skipped ({reason})", self.instrument_id)
            }
            DiagnosticKind::Failed { message } => {
                write!(f, "{}: failed ({message})", self.instrument_id)
            }
            DiagnosticKind::DeadlineSkipped => {
                write!(f, "{}: not scheduled before the run deadline", self.instrument_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CycleError::Numeric("singular system".to_string());
        assert_eq!(err.to_string(), "Numeric failure: singular system");

        let err = CycleError::InvalidConfig("period band inverted".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: period band inverted");
    }

    #[test]
    fn test_error_from_string() {
        let err: CycleError = "something odd".into();
        assert!(matches!(err, CycleError::Other(_)));
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::InsufficientHistory {
            observed: 10,
            required: 260,
        };
        assert_eq!(
            reason.to_string(),
            "insufficient history: 10 observed, 260 required"
        );
    }

    #[test]
    fn test_skip_reason_serde_round_trip() {
        let reason = SkipReason::ExcessiveFill {
            fraction: 0.6,
            ceiling: 0.5,
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("excessive_fill"));
        let back: SkipReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::skipped("FUND_A".to_string(), SkipReason::EmptyInput);
        assert_eq!(diag.to_string(), "FUND_A: skipped (no observations after cleaning)");
    }

    #[test]
    fn test_result_type() {
        let ok_result: Result<i32> = Ok(42);
        assert!(ok_result.is_ok());
    }
}
