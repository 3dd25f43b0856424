// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Type definitions, configuration, calibration state, and error
//! hierarchy for the abstention kernel, the NLI contradiction gate
//! that turns contradiction probabilities into ANSWER / ABSTAIN /
//! CONFLICT under a per-request latency budget.

pub mod calibration;
pub mod config;
pub mod decision;
pub mod error;
pub mod score;

pub use calibration::{Calibration, CalibrationCurve, CurvePoint};
pub use config::{AbstainConfig, NLI_LABELS};
pub use decision::{
    BudgetState, Decision, DecisionBasis, DiagnosticRecord, FallbackReason, GovernorState,
    RecordSubject, RequestOutcome, RequestStats, Verdict,
};
pub use error::{AbstainError, AbstainResult};
pub use score::{clamp_score, Pair, ScoredPair};
