// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Calibrated Decision Engine
// ─────────────────────────────────────────────────────────────────────
//! Maps a contradiction probability to ANSWER / ABSTAIN / CONFLICT.
//!
//! Policy (closed lower bound, open upper):
//! - `p >= tau` → ABSTAIN (ties favour caution)
//! - `p < tau_low` → ANSWER (`tau_low` defaults to `tau`)
//! - `tau_low <= p < tau` → CONFLICT, only when `tau_low` is configured
//!
//! Decisions are pure functions of the pair and the calibration
//! snapshot taken at request entry. Recalibration swaps the snapshot
//! for later requests only.

use std::sync::Arc;

use parking_lot::RwLock;

use abstain_types::{
    AbstainResult, BudgetState, Calibration, Decision, DecisionBasis, FallbackReason, ScoredPair,
    Verdict,
};

/// Threshold rule over an already-validated lower bound.
#[inline]
fn verdict_for(probability: f64, tau: f64, lower: f64) -> Verdict {
    if probability.is_nan() || probability >= tau {
        Verdict::Abstain
    } else if probability < lower {
        Verdict::Answer
    } else {
        Verdict::Conflict
    }
}

/// Classify a raw probability against `tau` / `tau_low`.
///
/// Fails with `InvalidThreshold` if `tau ∉ [0, 1]` or `tau_low > tau`.
/// A NaN probability abstains.
pub fn decide(probability: f64, tau: f64, tau_low: Option<f64>) -> AbstainResult<Verdict> {
    abstain_types::calibration::validate_thresholds(tau, tau_low)?;
    Ok(verdict_for(probability, tau, tau_low.unwrap_or(tau)))
}

/// Decision engine bound to one validated calibration snapshot.
///
/// Cloning is cheap (shared `Arc`).
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    calibration: Arc<Calibration>,
}

impl DecisionEngine {
    pub fn new(calibration: Calibration) -> AbstainResult<Self> {
        calibration.validate()?;
        Ok(Self {
            calibration: Arc::new(calibration),
        })
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Calibrated probability compared against tau. NaN passes through
    /// so it can abstain instead of being clamped to zero.
    pub fn calibrated(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            raw
        } else {
            self.calibration.apply(raw)
        }
    }

    pub fn decide(&self, scored: &ScoredPair, budget: BudgetState) -> Decision {
        let cal = &self.calibration;
        let p = self.calibrated(scored.contradiction_probability);
        Decision {
            verdict: verdict_for(p, cal.tau, cal.lower_bound()),
            tau: cal.tau,
            tau_low: cal.tau_low,
            calibrated_probability: Some(p),
            basis: DecisionBasis::Scored,
            budget,
        }
    }

    /// ABSTAIN for a pair the governor could not score.
    pub fn fallback(&self, reason: FallbackReason, budget: BudgetState) -> Decision {
        Decision::fallback(reason, &self.calibration, budget)
    }
}

/// Process-wide calibration state, swapped only at recalibration.
///
/// Request handling reads through [`snapshot`](Self::snapshot); the
/// only write path is [`recalibrate`](Self::recalibrate), which
/// validates before swapping so an invalid calibration never becomes
/// visible.
#[derive(Debug)]
pub struct CalibrationStore {
    current: RwLock<DecisionEngine>,
}

impl CalibrationStore {
    pub fn new(calibration: Calibration) -> AbstainResult<Self> {
        Ok(Self {
            current: RwLock::new(DecisionEngine::new(calibration)?),
        })
    }

    pub fn snapshot(&self) -> DecisionEngine {
        self.current.read().clone()
    }

    pub fn recalibrate(&self, calibration: Calibration) -> AbstainResult<()> {
        let engine = DecisionEngine::new(calibration).map_err(|e| {
            log::error!("rejected recalibration: {e}");
            e
        })?;
        log::info!(
            "recalibrated: tau={} tau_low={:?} curve={}",
            engine.calibration().tau,
            engine.calibration().tau_low,
            engine.calibration().curve.is_some()
        );
        *self.current.write() = engine;
        Ok(())
    }
}
