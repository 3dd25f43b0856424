// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

/// Root error type for all abstention kernel failures.
///
/// Budget exhaustion has no variant: running out of time is a normal
/// transition to fallback ABSTAIN, never an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbstainError {
    /// Tokenizer or model call failed for a whole batch.
    #[error("model inference error: {0}")]
    ModelInference(String),

    /// A pair exceeded the sequence limit while truncation is disabled.
    #[error("input too long: {length} tokens exceeds max_sequence_length {max_length}")]
    InputTooLong { length: usize, max_length: usize },

    /// Decision threshold outside [0, 1] or tau_low above tau.
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    /// Calibration curve is malformed or not monotone.
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Numerical error (NaN/Inf in model output).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Evaluation inputs are inconsistent or empty.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

pub type AbstainResult<T> = Result<T, AbstainError>;
