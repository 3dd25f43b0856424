// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Latency Governor
// ─────────────────────────────────────────────────────────────────────
//! Deadline enforcement around scorer calls.
//!
//! # Invariants
//!
//! 1. **Unscored never answers**: every pair that does not receive a
//!    usable model score resolves to a fallback, which the decision
//!    engine turns into ABSTAIN.
//!
//! 2. **Check before every blocking call**: the remaining budget is
//!    compared with `min_viable_scoring_time_ms` before each dispatch.
//!    Once below it, or once not even one pair is predicted to finish
//!    inside the headroom above it, the governor enters `Fallback`,
//!    which is terminal for the rest of the request.
//!
//! 3. **Shrunk batches finish early**: a batch sized from the observed
//!    cost must be predicted to finish strictly before the headroom
//!    `remaining - min_viable` runs out, never exactly at the deadline.
//!
//! 4. **No retries**: a failed or overrunning scorer call is never
//!    re-dispatched. A call that finishes past the deadline is treated
//!    as timed out and its pairs fall back.
//!
//! 5. **Wall-clock charging**: time is measured around the scorer call
//!    itself, not around submission, and charged to the shared budget.

use std::time::Duration;

use abstain_types::{
    AbstainConfig, AbstainError, BudgetState, FallbackReason, GovernorState, Pair, ScoredPair,
};

use crate::batch::{Batch, PairBatcher};
use crate::budget::{as_ms, from_ms, Budget};
use crate::scorer::{BatchScorer, PairScore};

/// How one pair was resolved by the governor.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Scored(ScoredPair),
    Fallback(FallbackReason),
}

/// A resolved pair with the budget state at resolution time.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernedPair {
    pub position: usize,
    pub resolution: Resolution,
    pub budget: BudgetState,
}

/// Outcome of governing one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GovernorReport {
    /// One entry per input pair, in input order.
    pub pairs: Vec<GovernedPair>,
    pub scorer_calls: usize,
    pub shrunk_batches: usize,
    pub final_state: GovernorState,
}

/// Per-request governor loop state.
struct Run {
    state: GovernorState,
    /// EWMA of observed scorer cost per pair, in milliseconds.
    per_pair_ms: Option<f64>,
    report: GovernorReport,
}

impl Run {
    fn transition(&mut self, to: GovernorState) {
        if self.state != to {
            log::debug!("latency governor: {} -> {}", self.state, to);
            self.state = to;
        }
    }
}

/// Wraps scorer invocations with the request deadline.
#[derive(Debug, Clone)]
pub struct LatencyGovernor {
    max_batch_size: usize,
    min_viable: Duration,
    cost_smoothing: f64,
}

impl LatencyGovernor {
    pub fn new(config: &AbstainConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            min_viable: from_ms(config.min_viable_scoring_time_ms),
            cost_smoothing: config.cost_smoothing.clamp(f64::EPSILON, 1.0),
        }
    }

    /// Largest batch the remaining budget can pay for, or `None` when
    /// not even one pair fits.
    ///
    /// Batches are sized against the headroom above the minimum viable
    /// time, and the predicted cost must stay strictly below it. Until a
    /// cost has been observed for this request the full
    /// `max_batch_size` is used.
    pub fn batch_limit(&self, remaining: Duration, per_pair_ms: Option<f64>) -> Option<usize> {
        match per_pair_ms {
            Some(cost) if cost > 0.0 => {
                let headroom = as_ms(remaining.saturating_sub(self.min_viable));
                let affordable = (headroom / cost).ceil() - 1.0;
                if affordable < 1.0 {
                    None
                } else if affordable >= self.max_batch_size as f64 {
                    Some(self.max_batch_size)
                } else {
                    Some(affordable as usize)
                }
            }
            _ => Some(self.max_batch_size),
        }
    }

    fn fall_back(run: &mut Run, batch: Batch<'_>, reason: FallbackReason, budget: &Budget<'_>) {
        let state = budget.state();
        run.report
            .pairs
            .extend(batch.positions().map(|position| GovernedPair {
                position,
                resolution: Resolution::Fallback(reason),
                budget: state,
            }));
    }

    fn resolution_for(result: PairScore) -> Resolution {
        match result {
            Ok(scored) => Resolution::Scored(scored),
            Err(AbstainError::InputTooLong { .. }) => {
                Resolution::Fallback(FallbackReason::InputTooLong)
            }
            Err(AbstainError::Numerical(_)) => {
                Resolution::Fallback(FallbackReason::NonFiniteOutput)
            }
            Err(_) => Resolution::Fallback(FallbackReason::InferenceFailed),
        }
    }

    /// Score `pairs` under `budget`, resolving every pair exactly once.
    pub fn govern(
        &self,
        pairs: &[Pair],
        budget: &Budget<'_>,
        scorer: &dyn BatchScorer,
    ) -> GovernorReport {
        let mut run = Run {
            state: GovernorState::Active,
            per_pair_ms: None,
            report: GovernorReport {
                pairs: Vec::with_capacity(pairs.len()),
                ..Default::default()
            },
        };
        let mut batcher = PairBatcher::new(pairs, self.max_batch_size);

        while !batcher.is_done() {
            if run.state == GovernorState::Fallback {
                if let Some(rest) = batcher.drain_rest() {
                    log::warn!(
                        "latency budget exhausted: {} pairs fall back to ABSTAIN unscored",
                        rest.len()
                    );
                    Self::fall_back(&mut run, rest, FallbackReason::BudgetExhausted, budget);
                }
                break;
            }

            let remaining = budget.remaining();
            if remaining < self.min_viable || remaining.is_zero() {
                log::debug!(
                    "remaining budget {:.1} ms below minimum viable {:.1} ms",
                    as_ms(remaining),
                    as_ms(self.min_viable)
                );
                run.transition(GovernorState::Fallback);
                continue;
            }

            let Some(limit) = self.batch_limit(remaining, run.per_pair_ms) else {
                log::debug!(
                    "no pair fits the {:.1} ms above the minimum viable time",
                    as_ms(remaining.saturating_sub(self.min_viable))
                );
                run.transition(GovernorState::Fallback);
                continue;
            };
            let full = self.max_batch_size.min(batcher.remaining());
            let Some(batch) = batcher.next_bounded(limit) else {
                break;
            };
            if batch.len() < full {
                run.report.shrunk_batches += 1;
                log::debug!(
                    "shrinking batch to {} of {full} pairs ({:.1} ms remaining)",
                    batch.len(),
                    as_ms(remaining)
                );
            }

            run.transition(GovernorState::Scoring);
            let started = budget.now();
            let result = scorer.score(batch.pairs());
            let cost = budget.now().saturating_sub(started);
            budget.charge(cost);
            run.report.scorer_calls += 1;
            run.transition(GovernorState::Active);

            let observed = as_ms(cost) / batch.len() as f64;
            run.per_pair_ms = Some(match run.per_pair_ms {
                Some(prev) => self.cost_smoothing * observed + (1.0 - self.cost_smoothing) * prev,
                None => observed,
            });

            if budget.is_exhausted() {
                log::warn!(
                    "scorer call overran the deadline ({:.1} ms, {} pairs); results discarded",
                    as_ms(cost),
                    batch.len()
                );
                Self::fall_back(&mut run, batch, FallbackReason::ScorerTimeout, budget);
                run.transition(GovernorState::Fallback);
                continue;
            }

            match result {
                Ok(scores) if scores.len() == batch.len() => {
                    let state = budget.state();
                    run.report.pairs.extend(batch.positions().zip(scores).map(
                        |(position, score)| GovernedPair {
                            position,
                            resolution: Self::resolution_for(score),
                            budget: state,
                        },
                    ));
                }
                Ok(scores) => {
                    log::warn!(
                        "scorer returned {} results for {} pairs; batch falls back",
                        scores.len(),
                        batch.len()
                    );
                    Self::fall_back(&mut run, batch, FallbackReason::InferenceFailed, budget);
                }
                Err(e) => {
                    log::warn!("scorer call failed for {} pairs: {e}", batch.len());
                    Self::fall_back(&mut run, batch, FallbackReason::InferenceFailed, budget);
                }
            }
        }

        run.report.final_state = run.state;
        run.report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::budget::ManualClock;

    /// Scores every pair at 0.1 and advances the clock by a fixed cost
    /// per pair.
    struct FakeScorer<'c> {
        clock: &'c ManualClock,
        ms_per_pair: f64,
        calls: AtomicUsize,
        sizes: Mutex<Vec<usize>>,
        fail_call: Option<usize>,
    }

    impl<'c> FakeScorer<'c> {
        fn new(clock: &'c ManualClock, ms_per_pair: f64) -> Self {
            Self {
                clock,
                ms_per_pair,
                calls: AtomicUsize::new(0),
                sizes: Mutex::new(Vec::new()),
                fail_call: None,
            }
        }
    }

    impl BatchScorer for FakeScorer<'_> {
        fn score(&self, batch: &[Pair]) -> abstain_types::AbstainResult<Vec<PairScore>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().unwrap().push(batch.len());
            self.clock.advance_ms(self.ms_per_pair * batch.len() as f64);
            if self.fail_call == Some(call) {
                return Err(AbstainError::ModelInference("boom".into()));
            }
            Ok(batch
                .iter()
                .map(|p| {
                    Ok(ScoredPair {
                        pair: p.clone(),
                        contradiction_probability: 0.1,
                        entailment_probability: None,
                        neutral_probability: None,
                        truncated: false,
                    })
                })
                .collect())
        }
    }

    fn pairs(n: usize) -> Vec<Pair> {
        (0..n).map(|i| Pair::new(format!("c{i}"), format!("h{i}"))).collect()
    }

    fn governor(max_batch: usize, budget_ms: f64, min_viable_ms: f64) -> LatencyGovernor {
        let mut cfg = AbstainConfig::for_model(0);
        cfg.max_batch_size = max_batch;
        cfg.time_budget_ms = budget_ms;
        cfg.min_viable_scoring_time_ms = min_viable_ms;
        cfg.cost_smoothing = 1.0;
        LatencyGovernor::new(&cfg)
    }

    fn scored_count(report: &GovernorReport) -> usize {
        report
            .pairs
            .iter()
            .filter(|p| matches!(p.resolution, Resolution::Scored(_)))
            .count()
    }

    #[test]
    fn test_empty_input_no_calls() {
        let clock = ManualClock::new();
        let scorer = FakeScorer::new(&clock, 1.0);
        let budget = Budget::start(&clock, 150.0);
        let report = governor(4, 150.0, 50.0).govern(&[], &budget, &scorer);
        assert!(report.pairs.is_empty());
        assert_eq!(report.scorer_calls, 0);
        assert_eq!(report.final_state, GovernorState::Active);
    }

    #[test]
    fn test_all_scored_within_budget() {
        let clock = ManualClock::new();
        let scorer = FakeScorer::new(&clock, 0.5);
        let input = pairs(10);
        let budget = Budget::start(&clock, 150.0);
        let report = governor(4, 150.0, 10.0).govern(&input, &budget, &scorer);
        assert_eq!(report.pairs.len(), 10);
        assert_eq!(scored_count(&report), 10);
        assert_eq!(report.scorer_calls, 3);
        let positions: Vec<usize> = report.pairs.iter().map(|p| p.position).collect();
        assert_eq!(positions, (0..10).collect::<Vec<_>>());
        assert!((as_ms(budget.charged()) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_exhausted_before_dispatch_never_calls_scorer() {
        let clock = ManualClock::new();
        let scorer = FakeScorer::new(&clock, 1.0);
        let input = pairs(5);
        let budget = Budget::start(&clock, 150.0);
        clock.advance_ms(120.0);
        let report = governor(4, 150.0, 50.0).govern(&input, &budget, &scorer);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.pairs.len(), 5);
        assert!(report.pairs.iter().all(|p| p.resolution
            == Resolution::Fallback(FallbackReason::BudgetExhausted)));
        assert_eq!(report.final_state, GovernorState::Fallback);
    }

    #[test]
    fn test_fallback_is_terminal_mid_request() {
        let clock = ManualClock::new();
        // First batch: 4 x 10 ms leaves 60 ms, 35 ms above the 25 ms
        // floor, so the next batch shrinks to 3 pairs. That leaves 30 ms
        // and no pair fits in the 5 ms of headroom.
        let scorer = FakeScorer::new(&clock, 10.0);
        let input = pairs(12);
        let budget = Budget::start(&clock, 100.0);
        let report = governor(4, 100.0, 25.0).govern(&input, &budget, &scorer);
        assert_eq!(report.pairs.len(), 12);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*scorer.sizes.lock().unwrap(), vec![4, 3]);
        assert_eq!(scored_count(&report), 7);
        assert!(report.pairs[7..].iter().all(|p| p.resolution
            == Resolution::Fallback(FallbackReason::BudgetExhausted)));
        assert_eq!(report.final_state, GovernorState::Fallback);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_batch_shrinks_when_budget_tight() {
        let clock = ManualClock::new();
        // First call: 8 pairs x 5 ms = 40 ms, leaving 20 ms (19 ms of
        // headroom) -> 3 pairs, which finish with 5 ms to spare.
        let scorer = FakeScorer::new(&clock, 5.0);
        let input = pairs(16);
        let budget = Budget::start(&clock, 60.0);
        let report = governor(8, 60.0, 1.0).govern(&input, &budget, &scorer);
        let sizes = scorer.sizes.lock().unwrap().clone();
        assert_eq!(sizes, vec![8, 3]);
        assert_eq!(report.shrunk_batches, 1);
        assert_eq!(report.pairs.len(), 16);
        assert!(report.pairs[8..11]
            .iter()
            .all(|p| matches!(p.resolution, Resolution::Scored(_))));
        assert!(report.pairs[11..].iter().all(|p| p.resolution
            == Resolution::Fallback(FallbackReason::BudgetExhausted)));
        assert!(report
            .pairs
            .iter()
            .all(|p| p.resolution != Resolution::Fallback(FallbackReason::ScorerTimeout)));
    }

    #[test]
    fn test_shrunk_batch_never_scheduled_to_hit_deadline() {
        let clock = ManualClock::new();
        // Zero floor: 20 ms left at 5 ms per pair would fit exactly 4
        // pairs ending on the deadline; only 3 are sent.
        let scorer = FakeScorer::new(&clock, 5.0);
        let input = pairs(12);
        let budget = Budget::start(&clock, 60.0);
        let report = governor(8, 60.0, 0.0).govern(&input, &budget, &scorer);
        let sizes = scorer.sizes.lock().unwrap().clone();
        assert_eq!(sizes[..2], [8, 3]);
        assert!(report
            .pairs
            .iter()
            .all(|p| p.resolution != Resolution::Fallback(FallbackReason::ScorerTimeout)));
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_overrunning_call_times_out() {
        let clock = ManualClock::new();
        let scorer = FakeScorer::new(&clock, 100.0);
        let input = pairs(3);
        let budget = Budget::start(&clock, 150.0);
        let report = governor(2, 150.0, 10.0).govern(&input, &budget, &scorer);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            report.pairs[0].resolution,
            Resolution::Fallback(FallbackReason::ScorerTimeout)
        );
        assert_eq!(
            report.pairs[2].resolution,
            Resolution::Fallback(FallbackReason::BudgetExhausted)
        );
        assert_eq!(report.final_state, GovernorState::Fallback);
    }

    #[test]
    fn test_failed_batch_is_not_retried() {
        let clock = ManualClock::new();
        let mut scorer = FakeScorer::new(&clock, 1.0);
        scorer.fail_call = Some(0);
        let input = pairs(6);
        let budget = Budget::start(&clock, 150.0);
        let report = governor(3, 150.0, 10.0).govern(&input, &budget, &scorer);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 2);
        assert!(report.pairs[..3].iter().all(|p| p.resolution
            == Resolution::Fallback(FallbackReason::InferenceFailed)));
        assert_eq!(scored_count(&report), 3);
        assert_eq!(report.final_state, GovernorState::Active);
    }

    #[test]
    fn test_batch_limit() {
        let gov = governor(8, 150.0, 10.0);
        assert_eq!(gov.batch_limit(Duration::from_millis(100), None), Some(8));
        assert_eq!(gov.batch_limit(Duration::from_millis(100), Some(5.0)), Some(8));
        // 20 ms headroom at 5 ms per pair: 4 would end exactly on it.
        assert_eq!(gov.batch_limit(Duration::from_millis(30), Some(5.0)), Some(3));
        assert_eq!(gov.batch_limit(Duration::from_millis(32), Some(5.0)), Some(4));
        assert_eq!(gov.batch_limit(Duration::from_millis(15), Some(5.0)), None);
        assert_eq!(gov.batch_limit(Duration::from_millis(2), Some(5.0)), None);
    }
}
