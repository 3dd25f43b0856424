// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Configuration
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

use crate::calibration::{validate_thresholds, Calibration};
use crate::error::{AbstainError, AbstainResult};

/// Number of classes a three-way NLI head must produce.
pub const NLI_LABELS: usize = 3;

fn default_truncation() -> bool {
    true
}

fn default_cost_smoothing() -> f64 {
    0.5
}

/// Runtime configuration for the abstention pipeline.
///
/// Every field except `tau_low`, `model_entailment_index`, `truncation`
/// and `cost_smoothing` is required when loading from JSON: the class
/// index in particular differs between NLI checkpoints and has no safe
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstainConfig {
    /// Position of the contradiction class in the model's logit vector.
    pub model_contradiction_index: usize,

    /// Position of the entailment class, if the caller wants the full
    /// three-way distribution reported. Neutral is the remaining index.
    #[serde(default)]
    pub model_entailment_index: Option<usize>,

    /// Upper bound on pairs per scorer call.
    pub max_batch_size: usize,

    /// Token limit per (context, claim) encoding.
    pub max_sequence_length: usize,

    /// Truncate overlong pairs at the tokenizer boundary (lossy).
    /// When false, overlong pairs are rejected individually.
    #[serde(default = "default_truncation")]
    pub truncation: bool,

    /// Wall-clock allowance from request entry to decision output.
    pub time_budget_ms: f64,

    /// Smallest remaining budget for which a scorer call is attempted.
    pub min_viable_scoring_time_ms: f64,

    /// Decision threshold: calibrated contradiction >= tau abstains.
    pub tau: f64,

    /// Lower edge of the CONFLICT zone. Absent means a two-way split.
    #[serde(default)]
    pub tau_low: Option<f64>,

    /// EWMA weight for the governor's per-pair cost estimate.
    #[serde(default = "default_cost_smoothing")]
    pub cost_smoothing: f64,
}

impl AbstainConfig {
    /// Operating defaults around an explicit, model-specific class index.
    ///
    /// 32-pair batches, 512 tokens, 150 ms budget with a 50 ms scoring
    /// floor, and tau = 0.5 with no conflict zone.
    pub fn for_model(model_contradiction_index: usize) -> Self {
        Self {
            model_contradiction_index,
            model_entailment_index: None,
            max_batch_size: 32,
            max_sequence_length: 512,
            truncation: default_truncation(),
            time_budget_ms: 150.0,
            min_viable_scoring_time_ms: 50.0,
            tau: 0.5,
            tau_low: None,
            cost_smoothing: default_cost_smoothing(),
        }
    }

    /// Validate configuration parameters.
    ///
    /// Threshold problems surface as `InvalidThreshold`; everything else
    /// as `Config`.
    pub fn validate(&self) -> AbstainResult<()> {
        validate_thresholds(self.tau, self.tau_low)?;
        if self.max_batch_size < 1 {
            return Err(AbstainError::Config(format!(
                "max_batch_size must be >= 1, got {}",
                self.max_batch_size
            )));
        }
        if self.max_sequence_length < 1 {
            return Err(AbstainError::Config(format!(
                "max_sequence_length must be >= 1, got {}",
                self.max_sequence_length
            )));
        }
        if !self.time_budget_ms.is_finite() || self.time_budget_ms <= 0.0 {
            return Err(AbstainError::Config(format!(
                "time_budget_ms must be finite and > 0, got {}",
                self.time_budget_ms
            )));
        }
        if !self.min_viable_scoring_time_ms.is_finite()
            || self.min_viable_scoring_time_ms < 0.0
            || self.min_viable_scoring_time_ms > self.time_budget_ms
        {
            return Err(AbstainError::Config(format!(
                "min_viable_scoring_time_ms must be in [0, {}], got {}",
                self.time_budget_ms, self.min_viable_scoring_time_ms
            )));
        }
        if !(self.cost_smoothing > 0.0 && self.cost_smoothing <= 1.0) {
            return Err(AbstainError::Config(format!(
                "cost_smoothing must be in (0, 1], got {}",
                self.cost_smoothing
            )));
        }
        if self.model_entailment_index == Some(self.model_contradiction_index) {
            return Err(AbstainError::Config(format!(
                "model_entailment_index and model_contradiction_index both point at class {}",
                self.model_contradiction_index
            )));
        }
        Ok(())
    }

    /// Check the class indices against the width of the model's output.
    ///
    /// Called once at scorer construction so a mismatched checkpoint
    /// fails at startup instead of producing silently wrong decisions.
    pub fn validate_for_labels(&self, num_labels: usize) -> AbstainResult<()> {
        if num_labels != NLI_LABELS {
            return Err(AbstainError::Config(format!(
                "NLI model must emit {NLI_LABELS} classes, got {num_labels}"
            )));
        }
        if self.model_contradiction_index >= num_labels {
            return Err(AbstainError::Config(format!(
                "model_contradiction_index {} out of range for {num_labels} classes",
                self.model_contradiction_index
            )));
        }
        if let Some(idx) = self.model_entailment_index {
            if idx >= num_labels {
                return Err(AbstainError::Config(format!(
                    "model_entailment_index {idx} out of range for {num_labels} classes"
                )));
            }
        }
        Ok(())
    }

    /// Threshold state described by this configuration (no curve).
    pub fn calibration(&self) -> AbstainResult<Calibration> {
        Calibration::new(self.tau, self.tau_low)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> AbstainResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| AbstainError::Config(format!("JSON parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_model_is_valid() {
        let config = AbstainConfig::for_model(0);
        assert!(config.validate().is_ok());
        assert!(config.validate_for_labels(3).is_ok());
    }

    #[test]
    fn test_tau_out_of_range() {
        let mut config = AbstainConfig::for_model(0);
        config.tau = 1.2;
        assert!(matches!(
            config.validate(),
            Err(AbstainError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_tau_low_above_tau() {
        let mut config = AbstainConfig::for_model(0);
        config.tau = 0.4;
        config.tau_low = Some(0.6);
        assert!(matches!(
            config.validate(),
            Err(AbstainError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = AbstainConfig::for_model(0);
        config.max_batch_size = 0;
        assert!(matches!(config.validate(), Err(AbstainError::Config(_))));
    }

    #[test]
    fn test_min_viable_exceeds_budget() {
        let mut config = AbstainConfig::for_model(0);
        config.min_viable_scoring_time_ms = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_budget() {
        let mut config = AbstainConfig::for_model(0);
        config.time_budget_ms = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cost_smoothing_range() {
        let mut config = AbstainConfig::for_model(0);
        config.cost_smoothing = 0.0;
        assert!(config.validate().is_err());
        config.cost_smoothing = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entailment_index_collision() {
        let mut config = AbstainConfig::for_model(2);
        config.model_entailment_index = Some(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_index_out_of_range_for_model() {
        let config = AbstainConfig::for_model(3);
        assert!(config.validate().is_ok());
        assert!(config.validate_for_labels(3).is_err());
    }

    #[test]
    fn test_two_class_model_rejected() {
        let config = AbstainConfig::for_model(0);
        assert!(config.validate_for_labels(2).is_err());
    }

    #[test]
    fn test_from_json_minimal() {
        let json = r#"{
            "model_contradiction_index": 0,
            "max_batch_size": 16,
            "max_sequence_length": 256,
            "time_budget_ms": 150.0,
            "min_viable_scoring_time_ms": 50.0,
            "tau": 0.7,
            "tau_low": 0.3
        }"#;
        let config = AbstainConfig::from_json(json).unwrap();
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.tau_low, Some(0.3));
        assert!(config.truncation);
        assert_eq!(config.model_entailment_index, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_requires_class_index() {
        let json = r#"{
            "max_batch_size": 16,
            "max_sequence_length": 256,
            "time_budget_ms": 150.0,
            "min_viable_scoring_time_ms": 50.0,
            "tau": 0.5
        }"#;
        assert!(matches!(
            AbstainConfig::from_json(json),
            Err(AbstainError::Config(_))
        ));
    }

    #[test]
    fn test_calibration_from_config() {
        let mut config = AbstainConfig::for_model(0);
        config.tau = 0.7;
        config.tau_low = Some(0.3);
        let cal = config.calibration().unwrap();
        assert_eq!(cal.tau, 0.7);
        assert_eq!(cal.lower_bound(), 0.3);
    }
}
