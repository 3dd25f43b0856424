// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Pipeline
// ─────────────────────────────────────────────────────────────────────
//! Request orchestration: budget → governor → scorer → decision engine.
//!
//! One [`AbstentionPipeline`] is shared across concurrent requests.
//! Each request owns its budget and takes a calibration snapshot at
//! entry; nothing else is mutated per request.

use std::sync::Arc;

use abstain_types::{
    AbstainConfig, AbstainResult, DiagnosticRecord, Pair, RecordSubject, RequestOutcome,
    RequestStats, Verdict,
};

use crate::budget::{Budget, Clock, SystemClock};
use crate::decision::CalibrationStore;
use crate::governor::{LatencyGovernor, Resolution};
use crate::nli::NliBackend;
use crate::scorer::{BatchScorer, ContradictionScorer};

/// Top-level abstention gate.
pub struct AbstentionPipeline {
    config: AbstainConfig,
    scorer: Arc<dyn BatchScorer>,
    governor: LatencyGovernor,
    calibration: Arc<CalibrationStore>,
    clock: Arc<dyn Clock>,
}

impl AbstentionPipeline {
    /// Pipeline over an NLI backend with the system clock and the
    /// thresholds from `config`.
    pub fn new(config: AbstainConfig, backend: Arc<dyn NliBackend>) -> AbstainResult<Self> {
        let calibration = Arc::new(CalibrationStore::new(config.calibration()?)?);
        Self::with_parts(config, backend, calibration, Arc::new(SystemClock::new()))
    }

    /// Pipeline with an injected calibration store and clock.
    pub fn with_parts(
        config: AbstainConfig,
        backend: Arc<dyn NliBackend>,
        calibration: Arc<CalibrationStore>,
        clock: Arc<dyn Clock>,
    ) -> AbstainResult<Self> {
        let scorer = Arc::new(ContradictionScorer::new(&config, backend)?);
        Self::with_scorer(config, scorer, calibration, clock)
    }

    /// Pipeline over any [`BatchScorer`].
    pub fn with_scorer(
        config: AbstainConfig,
        scorer: Arc<dyn BatchScorer>,
        calibration: Arc<CalibrationStore>,
        clock: Arc<dyn Clock>,
    ) -> AbstainResult<Self> {
        config.validate()?;
        log::info!(
            "abstention pipeline ready: budget={} ms, min_viable={} ms, max_batch={}, tau={}",
            config.time_budget_ms,
            config.min_viable_scoring_time_ms,
            config.max_batch_size,
            calibration.snapshot().calibration().tau
        );
        Ok(Self {
            governor: LatencyGovernor::new(&config),
            config,
            scorer,
            calibration,
            clock,
        })
    }

    pub fn config(&self) -> &AbstainConfig {
        &self.config
    }

    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    pub fn scorer(&self) -> &dyn BatchScorer {
        self.scorer.as_ref()
    }

    /// Start this request's deadline now.
    pub fn start_budget(&self) -> Budget<'_> {
        Budget::start(self.clock.as_ref(), self.config.time_budget_ms)
    }

    /// Decide every pair: same length and order as `pairs`.
    ///
    /// Never fails. Anything that prevents scoring a pair resolves to
    /// ABSTAIN with the reason recorded.
    pub fn evaluate(&self, pairs: &[Pair]) -> RequestOutcome {
        if pairs.is_empty() {
            return RequestOutcome::default();
        }
        let budget = self.start_budget();
        self.evaluate_within(pairs, &budget)
    }

    /// Decide every pair against a budget started by the caller, e.g.
    /// when request entry predates the call.
    pub fn evaluate_within(&self, pairs: &[Pair], budget: &Budget<'_>) -> RequestOutcome {
        if pairs.is_empty() {
            return RequestOutcome::default();
        }
        let engine = self.calibration.snapshot();
        let report = self.governor.govern(pairs, budget, self.scorer.as_ref());

        let mut stats = RequestStats {
            pairs: pairs.len(),
            scorer_calls: report.scorer_calls,
            shrunk_batches: report.shrunk_batches,
            final_state: report.final_state,
            ..Default::default()
        };

        let records: Vec<DiagnosticRecord> = report
            .pairs
            .into_iter()
            .map(|governed| {
                let (subject, decision) = match governed.resolution {
                    Resolution::Scored(scored) => {
                        stats.scored_pairs += 1;
                        let decision = engine.decide(&scored, governed.budget);
                        (RecordSubject::Scored(scored), decision)
                    }
                    Resolution::Fallback(reason) => {
                        stats.fallback_pairs += 1;
                        let decision = engine.fallback(reason, governed.budget);
                        (RecordSubject::Unscored(pairs[governed.position].clone()), decision)
                    }
                };
                DiagnosticRecord {
                    position: governed.position,
                    subject,
                    decision,
                    contradicted: None,
                }
            })
            .collect();

        let state = budget.state();
        stats.elapsed_ms = state.elapsed_ms;
        stats.charged_ms = state.charged_ms;

        let abstained = records
            .iter()
            .filter(|r| r.verdict() == Verdict::Abstain)
            .count();
        log::debug!(
            "request: {} pairs, {} scored, {} fallback, {} abstained, {} calls, {:.1} ms",
            stats.pairs,
            stats.scored_pairs,
            stats.fallback_pairs,
            abstained,
            stats.scorer_calls,
            stats.elapsed_ms
        );
        if stats.fallback_pairs > 0 {
            log::info!(
                "{} of {} pairs abstained unscored",
                stats.fallback_pairs,
                stats.pairs
            );
        }

        RequestOutcome { records, stats }
    }
}
