// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Evaluation Adapter
// ─────────────────────────────────────────────────────────────────────
//! Turns diagnostic records with caller-supplied ground truth into
//! metric inputs and an [`EvaluationSummary`].
//!
//! Only scored records feed the metrics. Fallback records have no
//! probability; they count toward coverage and the fallback rate.

use serde::{Deserialize, Serialize};

use abstain_types::{AbstainError, AbstainResult, DiagnosticRecord, RequestOutcome, Verdict};

use crate::metrics::{MetricSuite, RiskCoveragePoint, StandardMetrics};

/// Parallel metric inputs extracted from scored, labelled records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricInputs {
    /// Calibrated contradiction probability per scored record.
    pub probabilities: Vec<f64>,
    /// Ground truth: the claim was actually contradicted.
    pub outcomes: Vec<bool>,
}

impl MetricInputs {
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Confidence that answering is right: `1 - p(contradiction)`.
    pub fn answer_confidences(&self) -> Vec<f64> {
        self.probabilities.iter().map(|p| 1.0 - p).collect()
    }

    /// Answering is correct exactly when the claim is not contradicted.
    pub fn answer_correctness(&self) -> Vec<bool> {
        self.outcomes.iter().map(|&y| !y).collect()
    }
}

/// Evaluation over a set of labelled diagnostic records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub records: usize,
    pub scored: usize,
    pub ece: f64,
    /// `None` when the labels contain a single class.
    pub roc_auc: Option<f64>,
    pub risk_coverage: Vec<RiskCoveragePoint>,
    /// Mean risk over the risk-coverage curve.
    pub aurc: f64,
    /// Fraction of all records answered.
    pub coverage: f64,
    /// Contradicted fraction among answered records; `None` if nothing
    /// was answered.
    pub selective_risk: Option<f64>,
    pub conflict_rate: f64,
    pub fallback_rate: f64,
    /// Nearest-rank P99 of request wall-clock time, when request stats
    /// were supplied.
    pub latency_p99_ms: Option<f64>,
}

/// Feeds diagnostic records to a [`MetricSuite`].
#[derive(Debug, Clone, Default)]
pub struct EvaluationAdapter<M = StandardMetrics> {
    metrics: M,
}

impl<M: MetricSuite> EvaluationAdapter<M> {
    pub fn new(metrics: M) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    /// Extract metric inputs. Every scored record must carry ground
    /// truth.
    pub fn inputs(&self, records: &[DiagnosticRecord]) -> AbstainResult<MetricInputs> {
        let mut inputs = MetricInputs::default();
        for record in records {
            let Some(scored) = record.scored() else {
                continue;
            };
            let contradicted = record.contradicted.ok_or_else(|| {
                AbstainError::Evaluation(format!(
                    "record at position {} has no ground truth",
                    record.position
                ))
            })?;
            let p = record
                .decision
                .calibrated_probability
                .unwrap_or(scored.contradiction_probability);
            if !p.is_finite() {
                return Err(AbstainError::Evaluation(format!(
                    "record at position {} has non-finite probability {p}",
                    record.position
                )));
            }
            inputs.probabilities.push(p);
            inputs.outcomes.push(contradicted);
        }
        Ok(inputs)
    }

    /// Summarize labelled records without latency information.
    pub fn evaluate(&self, records: &[DiagnosticRecord]) -> AbstainResult<EvaluationSummary> {
        self.summarize(records, &[])
    }

    /// Summarize every record of several requests, including P99
    /// request latency.
    pub fn evaluate_requests(
        &self,
        outcomes: &[RequestOutcome],
    ) -> AbstainResult<EvaluationSummary> {
        let records: Vec<DiagnosticRecord> = outcomes
            .iter()
            .flat_map(|o| o.records.iter().cloned())
            .collect();
        let latencies: Vec<f64> = outcomes.iter().map(|o| o.stats.elapsed_ms).collect();
        self.summarize(&records, &latencies)
    }

    fn summarize(
        &self,
        records: &[DiagnosticRecord],
        latencies_ms: &[f64],
    ) -> AbstainResult<EvaluationSummary> {
        let inputs = self.inputs(records)?;
        if inputs.is_empty() {
            return Err(AbstainError::Evaluation(
                "no scored records to evaluate".to_string(),
            ));
        }

        let ece = self
            .metrics
            .expected_calibration_error(&inputs.probabilities, &inputs.outcomes);
        let auc = self.metrics.roc_auc(&inputs.probabilities, &inputs.outcomes);
        if auc.is_nan() {
            log::warn!("ROC-AUC undefined: ground truth contains a single class");
        }
        let risk_coverage = self
            .metrics
            .risk_coverage_curve(&inputs.answer_confidences(), &inputs.answer_correctness());
        let aurc = if risk_coverage.is_empty() {
            0.0
        } else {
            risk_coverage.iter().map(|p| p.risk).sum::<f64>() / risk_coverage.len() as f64
        };

        let total = records.len() as f64;
        let count = |verdict: Verdict| records.iter().filter(|r| r.verdict() == verdict).count();
        let answered: Vec<&DiagnosticRecord> = records
            .iter()
            .filter(|r| r.verdict() == Verdict::Answer)
            .collect();
        let selective_risk = if answered.is_empty() {
            None
        } else {
            let wrong = answered
                .iter()
                .filter(|r| r.contradicted == Some(true))
                .count();
            Some(wrong as f64 / answered.len() as f64)
        };
        let fallbacks = records.iter().filter(|r| r.decision.is_fallback()).count();

        let summary = EvaluationSummary {
            records: records.len(),
            scored: inputs.len(),
            ece,
            roc_auc: (!auc.is_nan()).then_some(auc),
            risk_coverage,
            aurc,
            coverage: answered.len() as f64 / total,
            selective_risk,
            conflict_rate: count(Verdict::Conflict) as f64 / total,
            fallback_rate: fallbacks as f64 / total,
            latency_p99_ms: percentile(latencies_ms, 99.0),
        };
        log::debug!(
            "evaluation: {} records, ece={:.4}, aurc={:.4}, coverage={:.3}",
            summary.records,
            summary.ece,
            summary.aurc,
            summary.coverage
        );
        Ok(summary)
    }
}

/// Nearest-rank percentile. `None` for an empty sample.
pub fn percentile(samples: &[f64], pct: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((pct.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use abstain_types::{
        BudgetState, Calibration, Decision, DecisionBasis, FallbackReason, Pair, RecordSubject,
        RequestStats, ScoredPair,
    };

    fn scored(position: usize, p: f64, verdict: Verdict, contradicted: bool) -> DiagnosticRecord {
        DiagnosticRecord {
            position,
            subject: RecordSubject::Scored(ScoredPair {
                pair: Pair::new("c", "h"),
                contradiction_probability: p,
                entailment_probability: None,
                neutral_probability: None,
                truncated: false,
            }),
            decision: Decision {
                verdict,
                tau: 0.5,
                tau_low: None,
                calibrated_probability: Some(p),
                basis: DecisionBasis::Scored,
                budget: BudgetState::default(),
            },
            contradicted: None,
        }
        .with_ground_truth(contradicted)
    }

    fn fallback(position: usize) -> DiagnosticRecord {
        let cal = Calibration::new(0.5, None).unwrap();
        DiagnosticRecord {
            position,
            subject: RecordSubject::Unscored(Pair::new("c", "h")),
            decision: Decision::fallback(
                FallbackReason::BudgetExhausted,
                &cal,
                BudgetState::default(),
            ),
            contradicted: None,
        }
    }

    #[test]
    fn test_inputs_skip_fallback_records() {
        let adapter = EvaluationAdapter::new(StandardMetrics::default());
        let records = vec![
            scored(0, 0.9, Verdict::Abstain, true),
            fallback(1),
            scored(2, 0.1, Verdict::Answer, false),
        ];
        let inputs = adapter.inputs(&records).unwrap();
        assert_eq!(inputs.probabilities, vec![0.9, 0.1]);
        assert_eq!(inputs.outcomes, vec![true, false]);
        assert_eq!(inputs.answer_correctness(), vec![false, true]);
    }

    #[test]
    fn test_missing_ground_truth_is_an_error() {
        let adapter = EvaluationAdapter::new(StandardMetrics::default());
        let mut record = scored(3, 0.2, Verdict::Answer, false);
        record.contradicted = None;
        let err = adapter.inputs(&[record]).unwrap_err();
        assert!(matches!(err, AbstainError::Evaluation(_)));
    }

    #[test]
    fn test_summary_rates() {
        let adapter = EvaluationAdapter::new(StandardMetrics::default());
        let records = vec![
            scored(0, 0.9, Verdict::Abstain, true),
            scored(1, 0.1, Verdict::Answer, false),
            scored(2, 0.2, Verdict::Answer, true),
            fallback(3),
        ];
        let s = adapter.evaluate(&records).unwrap();
        assert_eq!(s.records, 4);
        assert_eq!(s.scored, 3);
        assert_eq!(s.coverage, 0.5);
        assert_eq!(s.selective_risk, Some(0.5));
        assert_eq!(s.fallback_rate, 0.25);
        assert_eq!(s.conflict_rate, 0.0);
        assert_eq!(s.risk_coverage.len(), 3);
        assert!(s.roc_auc.is_some());
        assert_eq!(s.latency_p99_ms, None);
    }

    #[test]
    fn test_single_class_auc_is_none() {
        let adapter = EvaluationAdapter::new(StandardMetrics::default());
        let records = vec![
            scored(0, 0.1, Verdict::Answer, false),
            scored(1, 0.2, Verdict::Answer, false),
        ];
        let s = adapter.evaluate(&records).unwrap();
        assert_eq!(s.roc_auc, None);
        assert_eq!(s.aurc, 0.0);
    }

    #[test]
    fn test_all_fallback_cannot_be_evaluated() {
        let adapter = EvaluationAdapter::new(StandardMetrics::default());
        assert!(adapter.evaluate(&[fallback(0), fallback(1)]).is_err());
    }

    #[test]
    fn test_request_latency_p99() {
        let adapter = EvaluationAdapter::new(StandardMetrics::default());
        let outcomes: Vec<RequestOutcome> = (1..=100)
            .map(|ms| RequestOutcome {
                records: vec![scored(0, 0.1, Verdict::Answer, ms % 2 == 0)],
                stats: RequestStats {
                    pairs: 1,
                    elapsed_ms: ms as f64,
                    ..Default::default()
                },
            })
            .collect();
        let s = adapter.evaluate_requests(&outcomes).unwrap();
        assert_eq!(s.records, 100);
        assert_eq!(s.latency_p99_ms, Some(99.0));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        assert_eq!(percentile(&[], 99.0), None);
        assert_eq!(percentile(&[5.0], 99.0), Some(5.0));
        assert_eq!(percentile(&[3.0, 1.0, 2.0, 4.0], 50.0), Some(2.0));
        assert_eq!(percentile(&[3.0, 1.0, 2.0, 4.0], 100.0), Some(4.0));
    }
}
