// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Decision Records
// ─────────────────────────────────────────────────────────────────────
//! Decision outcomes and the per-pair diagnostic records handed to
//! logging and evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::score::{Pair, ScoredPair};

/// Final outcome for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Claim is not confidently contradicted; let it through.
    Answer,
    /// Claim is confidently contradicted, or was never scored.
    Abstain,
    /// Contradiction falls in the [tau_low, tau) uncertainty zone.
    Conflict,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer => write!(f, "ANSWER"),
            Self::Abstain => write!(f, "ABSTAIN"),
            Self::Conflict => write!(f, "CONFLICT"),
        }
    }
}

/// Why a pair received a fallback ABSTAIN instead of a scored decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Remaining budget fell below the minimum viable scoring time.
    BudgetExhausted,
    /// The scorer call finished after the request deadline.
    ScorerTimeout,
    /// The scorer call for this pair's batch failed.
    InferenceFailed,
    /// Pair exceeded the sequence limit with truncation disabled.
    InputTooLong,
    /// The model produced non-finite logits for this pair.
    NonFiniteOutput,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::ScorerTimeout => write!(f, "scorer_timeout"),
            Self::InferenceFailed => write!(f, "inference_failed"),
            Self::InputTooLong => write!(f, "input_too_long"),
            Self::NonFiniteOutput => write!(f, "non_finite_output"),
        }
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum DecisionBasis {
    Scored,
    Fallback(FallbackReason),
}

/// Snapshot of the request budget when a decision was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub limit_ms: f64,
    /// Wall-clock time since request entry.
    pub elapsed_ms: f64,
    /// Scorer time charged against the budget so far.
    pub charged_ms: f64,
    pub remaining_ms: f64,
    pub exhausted: bool,
}

/// Latency governor state machine.
///
/// `Active → Scoring → Active` per batch; `Active → Fallback` is
/// terminal for the rest of the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernorState {
    #[default]
    Active,
    Scoring,
    Fallback,
}

impl fmt::Display for GovernorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Scoring => write!(f, "SCORING"),
            Self::Fallback => write!(f, "FALLBACK"),
        }
    }
}

/// A verdict plus the thresholds and budget in effect, for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub tau: f64,
    pub tau_low: Option<f64>,
    /// Probability actually compared against tau (after the curve).
    /// `None` for fallback decisions.
    pub calibrated_probability: Option<f64>,
    pub basis: DecisionBasis,
    pub budget: BudgetState,
}

impl Decision {
    /// ABSTAIN for a pair that was never scored.
    ///
    /// An unscored claim must never default to ANSWER.
    pub fn fallback(
        reason: FallbackReason,
        calibration: &Calibration,
        budget: BudgetState,
    ) -> Self {
        Self {
            verdict: Verdict::Abstain,
            tau: calibration.tau,
            tau_low: calibration.tau_low,
            calibrated_probability: None,
            basis: DecisionBasis::Fallback(reason),
            budget,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.basis, DecisionBasis::Fallback(_))
    }
}

/// What the record is about: a scored pair, or a pair that never
/// reached the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSubject {
    Scored(ScoredPair),
    Unscored(Pair),
}

/// Durable per-pair output of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Position of the pair in the request input.
    pub position: usize,
    pub subject: RecordSubject,
    pub decision: Decision,
    /// Ground truth supplied later by the caller: whether the claim is
    /// actually contradicted by its context.
    #[serde(default)]
    pub contradicted: Option<bool>,
}

impl DiagnosticRecord {
    pub fn pair(&self) -> &Pair {
        match &self.subject {
            RecordSubject::Scored(scored) => &scored.pair,
            RecordSubject::Unscored(pair) => pair,
        }
    }

    pub fn scored(&self) -> Option<&ScoredPair> {
        match &self.subject {
            RecordSubject::Scored(scored) => Some(scored),
            RecordSubject::Unscored(_) => None,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.decision.verdict
    }

    /// Attach ground truth once it is known.
    pub fn with_ground_truth(mut self, contradicted: bool) -> Self {
        self.contradicted = Some(contradicted);
        self
    }
}

/// Per-request accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    pub pairs: usize,
    pub scorer_calls: usize,
    pub scored_pairs: usize,
    pub fallback_pairs: usize,
    /// Batches dispatched below `max_batch_size` because of budget.
    pub shrunk_batches: usize,
    pub elapsed_ms: f64,
    pub charged_ms: f64,
    pub final_state: GovernorState,
}

/// Everything a request produced, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub records: Vec<DiagnosticRecord>,
    pub stats: RequestStats,
}

impl RequestOutcome {
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.records.iter().map(DiagnosticRecord::verdict).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
