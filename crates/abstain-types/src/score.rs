// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Score Types
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

/// Clamp a value to [lo, hi], mapping NaN to lo and Inf to nearest bound.
#[inline]
pub fn clamp_score(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        log::warn!("clamp_score: NaN detected, clamping to {lo:.4}");
        return lo;
    }
    if value.is_infinite() {
        let boundary = if value > 0.0 { hi } else { lo };
        log::warn!("clamp_score: Inf detected, clamping to {boundary:.4}");
        return boundary;
    }
    value.clamp(lo, hi)
}

/// A (context, claim) pair: the unit of scoring.
///
/// The context is the NLI premise, the claim the hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub context: String,
    pub claim: String,
}

impl Pair {
    pub fn new(context: impl Into<String>, claim: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            claim: claim.into(),
        }
    }
}

/// A pair together with the model's normalized class probabilities.
///
/// Produced once per pair per scorer call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPair {
    pub pair: Pair,
    /// Raw (uncalibrated) contradiction probability in [0, 1].
    pub contradiction_probability: f64,
    /// Present when the entailment class index is configured.
    pub entailment_probability: Option<f64>,
    /// Present when the entailment class index is configured.
    pub neutral_probability: Option<f64>,
    /// Whether the encoder cut this pair at `max_sequence_length`.
    pub truncated: bool,
}

impl ScoredPair {
    /// Sum of the reported distribution, when all three are present.
    pub fn distribution_mass(&self) -> Option<f64> {
        match (self.entailment_probability, self.neutral_probability) {
            (Some(e), Some(n)) => Some(self.contradiction_probability + e + n),
            _ => None,
        }
    }
}
