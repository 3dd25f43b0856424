// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Reference Evaluation Metrics
// ─────────────────────────────────────────────────────────────────────
//! Metric collaborators consumed by the evaluation adapter.
//!
//! The adapter only depends on [`MetricSuite`]; [`StandardMetrics`] is
//! the reference implementation used by the Python bindings and tests.

use serde::{Deserialize, Serialize};

/// One point of a risk-coverage curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskCoveragePoint {
    /// Fraction of items answered, in (0, 1].
    pub coverage: f64,
    /// Error rate among the answered items.
    pub risk: f64,
}

/// Numeric contract for the three evaluation metrics.
///
/// Inputs are parallel slices of equal length.
pub trait MetricSuite {
    /// Expected calibration error of `probabilities` against the
    /// observed binary `outcomes`.
    fn expected_calibration_error(&self, probabilities: &[f64], outcomes: &[bool]) -> f64;

    /// Risk-coverage curve ordered by increasing coverage. Items are
    /// admitted in descending `confidence`; `correct` marks the items
    /// whose answer would have been right.
    fn risk_coverage_curve(&self, confidences: &[f64], correct: &[bool]) -> Vec<RiskCoveragePoint>;

    /// Area under the ROC curve. NaN when only one class is present.
    fn roc_auc(&self, probabilities: &[f64], outcomes: &[bool]) -> f64;
}

/// Equal-width-bin ECE, rank-based ROC-AUC, and a stepwise
/// risk-coverage curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardMetrics {
    pub bins: usize,
}

impl Default for StandardMetrics {
    fn default() -> Self {
        Self { bins: 10 }
    }
}

impl StandardMetrics {
    pub fn with_bins(bins: usize) -> Self {
        Self { bins: bins.max(1) }
    }

    fn bin_of(&self, p: f64) -> usize {
        let bins = self.bins.max(1);
        ((p.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1)
    }
}

impl MetricSuite for StandardMetrics {
    fn expected_calibration_error(&self, probabilities: &[f64], outcomes: &[bool]) -> f64 {
        let n = probabilities.len().min(outcomes.len());
        if n == 0 {
            return 0.0;
        }
        let bins = self.bins.max(1);
        let mut count = vec![0usize; bins];
        let mut confidence = vec![0.0f64; bins];
        let mut positives = vec![0.0f64; bins];
        for (&p, &y) in probabilities.iter().zip(outcomes).take(n) {
            let b = self.bin_of(p);
            count[b] += 1;
            confidence[b] += p;
            positives[b] += if y { 1.0 } else { 0.0 };
        }
        (0..bins)
            .filter(|&b| count[b] > 0)
            .map(|b| {
                let k = count[b] as f64;
                (k / n as f64) * (confidence[b] / k - positives[b] / k).abs()
            })
            .sum()
    }

    fn risk_coverage_curve(&self, confidences: &[f64], correct: &[bool]) -> Vec<RiskCoveragePoint> {
        let n = confidences.len().min(correct.len());
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| confidences[b].total_cmp(&confidences[a]));

        let mut errors = 0usize;
        order
            .iter()
            .enumerate()
            .map(|(k, &i)| {
                if !correct[i] {
                    errors += 1;
                }
                let answered = (k + 1) as f64;
                RiskCoveragePoint {
                    coverage: answered / n as f64,
                    risk: errors as f64 / answered,
                }
            })
            .collect()
    }

    fn roc_auc(&self, probabilities: &[f64], outcomes: &[bool]) -> f64 {
        let n = probabilities.len().min(outcomes.len());
        let positives = outcomes.iter().take(n).filter(|&&y| y).count();
        let negatives = n - positives;
        if positives == 0 || negatives == 0 {
            return f64::NAN;
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

        // Mann-Whitney U with average ranks for ties.
        let mut positive_rank_sum = 0.0;
        let mut start = 0;
        while start < n {
            let mut end = start + 1;
            while end < n && probabilities[order[end]] == probabilities[order[start]] {
                end += 1;
            }
            let avg_rank = (start + 1 + end) as f64 / 2.0;
            let tied_positives = order[start..end].iter().filter(|&&i| outcomes[i]).count();
            positive_rank_sum += avg_rank * tied_positives as f64;
            start = end;
        }

        let p = positives as f64;
        (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ece_perfectly_calibrated() {
        let m = StandardMetrics::default();
        // Bin [0.2, 0.3): mean 0.25, one of four positive.
        let probs = [0.25; 4];
        let outcomes = [true, false, false, false];
        assert!(m.expected_calibration_error(&probs, &outcomes).abs() < 1e-12);
    }

    #[test]
    fn test_ece_overconfident() {
        let m = StandardMetrics::default();
        let probs = [0.95, 0.95, 0.05, 0.05];
        let outcomes = [false, false, true, true];
        let ece = m.expected_calibration_error(&probs, &outcomes);
        assert!((ece - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_ece_edge_probabilities_binned() {
        let m = StandardMetrics::default();
        assert_eq!(m.bin_of(1.0), 9);
        assert_eq!(m.bin_of(0.0), 0);
        assert_eq!(m.expected_calibration_error(&[], &[]), 0.0);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let m = StandardMetrics::default();
        let outcomes = [false, false, true, true];
        assert_eq!(m.roc_auc(&[0.1, 0.2, 0.8, 0.9], &outcomes), 1.0);
        assert_eq!(m.roc_auc(&[0.9, 0.8, 0.2, 0.1], &outcomes), 0.0);
    }

    #[test]
    fn test_auc_ties_count_half() {
        let m = StandardMetrics::default();
        assert_eq!(m.roc_auc(&[0.5, 0.5], &[false, true]), 0.5);
    }

    #[test]
    fn test_auc_single_class_is_nan() {
        let m = StandardMetrics::default();
        assert!(m.roc_auc(&[0.1, 0.9], &[true, true]).is_nan());
    }

    #[test]
    fn test_risk_coverage_orders_by_confidence() {
        let m = StandardMetrics::default();
        let curve = m.risk_coverage_curve(&[0.2, 0.9, 0.6, 0.4], &[false, true, true, false]);
        let coverage: Vec<f64> = curve.iter().map(|p| p.coverage).collect();
        let risk: Vec<f64> = curve.iter().map(|p| p.risk).collect();
        assert_eq!(coverage, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(risk, vec![0.0, 0.0, 1.0 / 3.0, 0.5]);
    }
}
