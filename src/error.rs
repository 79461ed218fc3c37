//! Error types for the scan engine.
//!
//! Two layers are defined here:
//!
//! - **`Anomaly`**: scan-local control conditions raised by validators and
//!   sequencing helpers (`NonZeroReading`, `Saturation`, `NoisySignal`,
//!   `Overlapped`, `ZeroSignal`). They carry no payload; the capture loop
//!   pattern-matches on the kind and owns the recovery policy.
//! - **`ScanError`**: everything that can fail in the crate, including the
//!   anomalies above (via `#[from]`), currying arity mismatches, fit
//!   validation failures and configuration problems.
//!
//! Nothing in this crate retries or swallows an anomaly. They propagate with
//! `?` up to whoever drives the scan.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// A typed anomaly detected while scanning.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anomaly {
    /// Reading deviates from the expected null/background state.
    #[error("non-zero reading detected")]
    NonZeroReading,

    /// Sensor value pinned at full scale; the current measurement set must be retaken.
    #[error("sensor saturated, measurement set must be retaken")]
    Saturation,

    /// Excessive noise; the caller should fall back to a raster scan.
    #[error("noisy signal detected")]
    NoisySignal,

    /// Every proposed position has already been visited.
    #[error("all proposed positions have already been visited")]
    Overlapped,

    /// All readings in a set are zero.
    #[error("all readings are zero")]
    ZeroSignal,
}

/// Errors raised by the scan engine.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan anomaly: {0}")]
    Anomaly(#[from] Anomaly),

    #[error("Baked function expects {expected} pass-through argument(s), got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("Invalid pass-through span ({lo}, {hi}) for {len} baked argument(s)")]
    InvalidSpan { lo: usize, hi: usize, len: usize },

    #[error("Results table is empty")]
    EmptyResults,

    #[error(
        "Extrapolation occurred: maximum at {value} lies on the edge of the sampled range \
         [{min}, {max}], measure over a wider range"
    )]
    Extrapolation { value: f64, min: f64, max: f64 },

    #[error("Parabolic fit failed: {0}")]
    DegenerateFit(String),

    #[error("Can't find the scan direction: no axis is moving")]
    NoScanAxis,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Stage error: {0}")]
    Stage(String),

    #[error("Operator decision error: {0}")]
    Decision(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}

impl ScanError {
    /// Returns the anomaly kind if this error is a scan anomaly.
    pub fn anomaly(&self) -> Option<Anomaly> {
        match self {
            ScanError::Anomaly(kind) => Some(*kind),
            _ => None,
        }
    }
}
