// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Contradiction Scorer
// ─────────────────────────────────────────────────────────────────────
//! Batched NLI contradiction scoring.
//!
//! The only component that touches the model. Encodes a batch jointly,
//! runs inference once, normalizes each logit row with softmax, and
//! reads the contradiction probability at the configured class index.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use abstain_types::{AbstainConfig, AbstainError, AbstainResult, Pair, ScoredPair, NLI_LABELS};

use crate::nli::{softmax, EncodedBatch, NliBackend};

/// Per-pair scoring outcome. Errors here affect only that pair.
pub type PairScore = AbstainResult<ScoredPair>;

/// Anything that can score a batch in order.
///
/// The outer `Err` fails the whole batch; inner errors fail one pair.
pub trait BatchScorer: Send + Sync {
    fn score(&self, batch: &[Pair]) -> AbstainResult<Vec<PairScore>>;
}

/// Wrap backend failures (errors or panics) as `ModelInference`.
fn as_inference(err: AbstainError) -> AbstainError {
    match err {
        AbstainError::ModelInference(_) => err,
        other => AbstainError::ModelInference(other.to_string()),
    }
}

fn guarded<T>(stage: &str, call: impl FnOnce() -> AbstainResult<T>) -> AbstainResult<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(as_inference),
        Err(_) => {
            log::error!("NLI backend panicked during {stage}");
            Err(AbstainError::ModelInference(format!(
                "backend panicked during {stage}"
            )))
        }
    }
}

/// NLI contradiction scorer over a shared, read-only backend.
pub struct ContradictionScorer {
    backend: Arc<dyn NliBackend>,
    contradiction_index: usize,
    entailment_index: Option<usize>,
    neutral_index: Option<usize>,
    max_sequence_length: usize,
    truncation: bool,
}

impl ContradictionScorer {
    /// Build a scorer, failing fast if the configured class indices do
    /// not fit the backend's output width or the sequence limit cannot
    /// hold the pair template.
    pub fn new(config: &AbstainConfig, backend: Arc<dyn NliBackend>) -> AbstainResult<Self> {
        config.validate()?;
        config.validate_for_labels(backend.num_labels())?;
        let special = backend.template().special_tokens();
        if config.max_sequence_length <= special {
            return Err(AbstainError::Config(format!(
                "max_sequence_length {} leaves no room after {special} special tokens",
                config.max_sequence_length
            )));
        }

        let contradiction_index = config.model_contradiction_index;
        let entailment_index = config.model_entailment_index;
        let neutral_index = entailment_index
            .and_then(|e| (0..NLI_LABELS).find(|&i| i != contradiction_index && i != e));

        Ok(Self {
            backend,
            contradiction_index,
            entailment_index,
            neutral_index,
            max_sequence_length: config.max_sequence_length,
            truncation: config.truncation,
        })
    }

    pub fn contradiction_index(&self) -> usize {
        self.contradiction_index
    }

    pub fn backend(&self) -> &Arc<dyn NliBackend> {
        &self.backend
    }

    fn scored(&self, pair: &Pair, probs: &[f64], truncated: bool) -> ScoredPair {
        ScoredPair {
            pair: pair.clone(),
            contradiction_probability: probs[self.contradiction_index],
            entailment_probability: self.entailment_index.map(|i| probs[i]),
            neutral_probability: self.neutral_index.map(|i| probs[i]),
            truncated,
        }
    }

    /// Score a batch: same length and order as `batch`.
    pub fn score_batch(&self, batch: &[Pair]) -> AbstainResult<Vec<PairScore>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = guarded("encode", || {
            self.backend
                .encode(batch, self.max_sequence_length, self.truncation)
        })?;
        if encoded.len() != batch.len() {
            return Err(AbstainError::ModelInference(format!(
                "encoder returned {} rows for {} pairs",
                encoded.len(),
                batch.len()
            )));
        }

        let mut outcomes: Vec<Option<PairScore>> = (0..batch.len()).map(|_| None).collect();
        let mut kept: Vec<usize> = (0..batch.len()).collect();

        // Without truncation, overlong pairs are rejected one by one and
        // the rest of the batch is still scored.
        let encoded = if self.truncation {
            encoded
        } else {
            let keep: Vec<bool> = encoded
                .lengths()
                .iter()
                .map(|&len| len <= self.max_sequence_length)
                .collect();
            for (i, &ok) in keep.iter().enumerate() {
                if !ok {
                    let length = encoded.lengths()[i];
                    log::warn!(
                        "pair {i} is {length} tokens, over max_sequence_length {}; no truncation",
                        self.max_sequence_length
                    );
                    outcomes[i] = Some(Err(AbstainError::InputTooLong {
                        length,
                        max_length: self.max_sequence_length,
                    }));
                }
            }
            kept.retain(|&i| keep[i]);
            if kept.len() == batch.len() {
                encoded
            } else {
                encoded.retain_rows(&keep)
            }
        };

        if !kept.is_empty() {
            let logits = guarded("inference", || self.backend.infer(&encoded))?;
            self.check_logits(&logits, &encoded)?;
            for (r, (row, &i)) in logits.iter().zip(&kept).enumerate() {
                outcomes[i] = Some(match softmax(row) {
                    Some(probs) => Ok(self.scored(&batch[i], &probs, encoded.truncated()[r])),
                    None => {
                        log::warn!("NLI returned non-finite logits for pair {i}");
                        Err(AbstainError::Numerical(format!(
                            "non-finite logits for pair {i}"
                        )))
                    }
                });
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    Err(AbstainError::ModelInference("pair left unscored".to_string()))
                })
            })
            .collect())
    }

    fn check_logits(&self, logits: &[Vec<f32>], encoded: &EncodedBatch) -> AbstainResult<()> {
        if logits.len() != encoded.len() {
            return Err(AbstainError::ModelInference(format!(
                "model returned {} logit rows for {} inputs",
                logits.len(),
                encoded.len()
            )));
        }
        if let Some(bad) = logits.iter().find(|row| row.len() != NLI_LABELS) {
            return Err(AbstainError::ModelInference(format!(
                "model returned {} logits per row, expected {NLI_LABELS}",
                bad.len()
            )));
        }
        Ok(())
    }
}

impl BatchScorer for ContradictionScorer {
    fn score(&self, batch: &[Pair]) -> AbstainResult<Vec<PairScore>> {
        self.score_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::nli::{ExternalNli, HeuristicNli, PairTemplate};

    fn config() -> AbstainConfig {
        AbstainConfig::for_model(HeuristicNli::CONTRADICTION)
    }

    fn pairs() -> Vec<Pair> {
        vec![
            Pair::new("Paris is in France", "Paris is in France"),
            Pair::new("The sky is not blue", "The sky is blue"),
            Pair::new("Water is wet", "Bananas grow on trees"),
        ]
    }

    /// Logits that softmax to `p` at index 0 and split the rest.
    fn logits_for(p: f64) -> Vec<f32> {
        let rest = ((1.0 - p) / 2.0).ln() as f32;
        vec![p.ln() as f32, rest, rest]
    }

    #[test]
    fn test_score_preserves_order_and_length() {
        let scorer = ContradictionScorer::new(&config(), Arc::new(HeuristicNli::new())).unwrap();
        let input = pairs();
        let scored = scorer.score_batch(&input).unwrap();
        assert_eq!(scored.len(), input.len());
        for (s, p) in scored.iter().zip(&input) {
            assert_eq!(&s.as_ref().unwrap().pair, p);
        }
        let probs: Vec<f64> = scored
            .iter()
            .map(|s| s.as_ref().unwrap().contradiction_probability)
            .collect();
        assert!(probs[0] < 0.1);
        assert!(probs[1] > 0.8);
    }

    #[test]
    fn test_empty_batch_skips_backend() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let backend = ExternalNli::new(
            3,
            PairTemplate::bert(1, 2, 0),
            move |texts| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(texts.iter().map(|_| vec![5]).collect())
            },
            |input| Ok(vec![vec![0.0; 3]; input.len()]),
        );
        let scorer = ContradictionScorer::new(&config(), Arc::new(backend)).unwrap();
        assert!(scorer.score_batch(&[]).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_does_not_mutate_input() {
        let scorer = ContradictionScorer::new(&config(), Arc::new(HeuristicNli::new())).unwrap();
        let input = pairs();
        let before = input.clone();
        let _ = scorer.score_batch(&input).unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn test_configured_index_is_used() {
        let backend = ExternalNli::new(
            3,
            PairTemplate::bert(1, 2, 0),
            |texts| Ok(texts.iter().map(|_| vec![5]).collect()),
            |input| {
                // Contradiction lives at index 2 for this checkpoint.
                let mut row = logits_for(0.9);
                row.swap(0, 2);
                Ok(vec![row; input.len()])
            },
        );
        let mut cfg = AbstainConfig::for_model(2);
        cfg.model_entailment_index = Some(0);
        let scorer = ContradictionScorer::new(&cfg, Arc::new(backend)).unwrap();
        let scored = scorer.score_batch(&[Pair::new("a", "b")]).unwrap();
        let s = scored[0].as_ref().unwrap();
        assert!((s.contradiction_probability - 0.9).abs() < 1e-6);
        assert!((s.distribution_mass().unwrap() - 1.0).abs() < 1e-9);
        assert!((s.entailment_probability.unwrap() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_index_out_of_range_fails_fast() {
        let cfg = AbstainConfig::for_model(5);
        assert!(matches!(
            ContradictionScorer::new(&cfg, Arc::new(HeuristicNli::new())),
            Err(AbstainError::Config(_))
        ));
    }

    #[test]
    fn test_sequence_limit_must_fit_template() {
        let mut cfg = config();
        cfg.max_sequence_length = 3;
        assert!(ContradictionScorer::new(&cfg, Arc::new(HeuristicNli::new())).is_err());
    }

    #[test]
    fn test_truncation_is_silent() {
        let mut cfg = config();
        cfg.max_sequence_length = 8;
        let scorer = ContradictionScorer::new(&cfg, Arc::new(HeuristicNli::new())).unwrap();
        let long = "lorem ipsum ".repeat(50);
        let scored = scorer
            .score_batch(&[Pair::new(long.as_str(), "short claim")])
            .unwrap();
        assert!(scored[0].as_ref().unwrap().truncated);
    }

    #[test]
    fn test_overlong_pair_rejected_without_truncation() {
        let mut cfg = config();
        cfg.max_sequence_length = 8;
        cfg.truncation = false;
        let scorer = ContradictionScorer::new(&cfg, Arc::new(HeuristicNli::new())).unwrap();
        let long = "lorem ipsum ".repeat(50);
        let input = vec![
            Pair::new("a b", "a b"),
            Pair::new(long.as_str(), "short claim"),
            Pair::new("c d", "c d"),
        ];
        let scored = scorer.score_batch(&input).unwrap();
        assert!(scored[0].is_ok());
        assert!(matches!(
            scored[1],
            Err(AbstainError::InputTooLong { max_length: 8, .. })
        ));
        assert_eq!(scored[2].as_ref().unwrap().pair, input[2]);
    }

    #[test]
    fn test_backend_failure_fails_batch() {
        let backend = ExternalNli::new(
            3,
            PairTemplate::bert(1, 2, 0),
            |texts| Ok(texts.iter().map(|_| vec![5]).collect()),
            |_| Err("device lost".to_string()),
        );
        let scorer = ContradictionScorer::new(&config(), Arc::new(backend)).unwrap();
        assert!(matches!(
            scorer.score_batch(&pairs()),
            Err(AbstainError::ModelInference(_))
        ));
    }

    #[test]
    fn test_backend_panic_is_contained() {
        let backend = ExternalNli::new(
            3,
            PairTemplate::bert(1, 2, 0),
            |texts| Ok(texts.iter().map(|_| vec![5]).collect()),
            |_| panic!("boom"),
        );
        let scorer = ContradictionScorer::new(&config(), Arc::new(backend)).unwrap();
        assert!(matches!(
            scorer.score_batch(&pairs()),
            Err(AbstainError::ModelInference(_))
        ));
    }

    #[test]
    fn test_wrong_row_count_fails_batch() {
        let backend = ExternalNli::new(
            3,
            PairTemplate::bert(1, 2, 0),
            |texts| Ok(texts.iter().map(|_| vec![5]).collect()),
            |_| Ok(vec![vec![0.0; 3]]),
        );
        let scorer = ContradictionScorer::new(&config(), Arc::new(backend)).unwrap();
        assert!(scorer.score_batch(&pairs()).is_err());
    }

    #[test]
    fn test_non_finite_row_fails_only_that_pair() {
        let backend = ExternalNli::new(
            3,
            PairTemplate::bert(1, 2, 0),
            |texts| Ok(texts.iter().map(|_| vec![5]).collect()),
            |input| {
                let mut rows = vec![logits_for(0.2); input.len()];
                rows[1][0] = f32::NAN;
                Ok(rows)
            },
        );
        let scorer = ContradictionScorer::new(&config(), Arc::new(backend)).unwrap();
        let scored = scorer.score_batch(&pairs()).unwrap();
        assert!(scored[0].is_ok());
        assert!(matches!(scored[1], Err(AbstainError::Numerical(_))));
        assert!(scored[2].is_ok());
    }
}
