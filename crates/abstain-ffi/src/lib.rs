// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel PyO3 FFI Bindings
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
// Note: #[deny(unsafe_code)] not applied: PyO3 proc macros generate
// unsafe blocks internally. All hand-written code in this crate is safe.
//! Python-callable wrappers around the Rust abstention kernel.
//!
//! Exposes `AbstainConfig`, `AbstentionPipeline`, `RequestOutcome`,
//! `DecisionRecord`, `decide`, and `evaluate` to Python via PyO3.
//!
//! # FFI Safety
//!
//! - GIL acquired via `Python::with_gil` before every Python callback;
//!   the GIL is released while the pipeline runs.
//! - Python exceptions in tokenizer or model callbacks become inference
//!   failures, so the affected batch abstains.
//! - No borrowed references escape the GIL lock scope.
//! - All config validated before storage (`AbstainConfig::validate()`).
//!
//! Install: `pip install -e crates/abstain-ffi` (requires maturin).
//!
//! Usage from Python:
//! ```python
//! from abstain_kernel import AbstainConfig, AbstentionPipeline
//!
//! def tokenize(texts):
//!     return [tok.encode(t, add_special_tokens=False) for t in texts]
//!
//! def infer(input_ids, attention_mask):
//!     return model(torch.tensor(input_ids), torch.tensor(attention_mask)).logits.tolist()
//!
//! labels = model.config.label2id
//! config = AbstainConfig(labels["contradiction"], tau=0.5)
//! pipeline = AbstentionPipeline(
//!     config, tokenize, infer, num_labels=model.config.num_labels
//! )
//! outcome = pipeline.evaluate([("The sky is blue.", "The sky is green.")])
//! outcome.verdicts  # ["ABSTAIN"]
//! ```

use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use abstain_core::{decide as decide_verdict, AbstentionPipeline, ExternalNli, HeuristicNli};
use abstain_core::{EncodedBatch, NliBackend, PairTemplate};
use abstain_eval::{EvaluationAdapter, EvaluationSummary, StandardMetrics};
use abstain_types::{
    AbstainConfig, AbstainError, Calibration, CalibrationCurve, DecisionBasis, DiagnosticRecord,
    Pair, RequestOutcome,
};

fn to_py_err(err: AbstainError) -> PyErr {
    match err {
        AbstainError::ModelInference(_) | AbstainError::Numerical(_) => {
            PyRuntimeError::new_err(err.to_string())
        }
        _ => PyValueError::new_err(err.to_string()),
    }
}

// ─── PyAbstainConfig ────────────────────────────────────────────────

/// Python-visible configuration for the abstention pipeline.
#[pyclass(name = "AbstainConfig")]
#[derive(Clone)]
struct PyAbstainConfig {
    inner: AbstainConfig,
}

#[pymethods]
impl PyAbstainConfig {
    /// `model_contradiction_index` is required: class order differs
    /// between checkpoints.
    #[new]
    #[pyo3(signature = (
        model_contradiction_index,
        model_entailment_index = None,
        max_batch_size = 32,
        max_sequence_length = 512,
        truncation = true,
        time_budget_ms = 150.0,
        min_viable_scoring_time_ms = 50.0,
        tau = 0.5,
        tau_low = None,
        cost_smoothing = 0.5,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        model_contradiction_index: usize,
        model_entailment_index: Option<usize>,
        max_batch_size: usize,
        max_sequence_length: usize,
        truncation: bool,
        time_budget_ms: f64,
        min_viable_scoring_time_ms: f64,
        tau: f64,
        tau_low: Option<f64>,
        cost_smoothing: f64,
    ) -> PyResult<Self> {
        let config = AbstainConfig {
            model_contradiction_index,
            model_entailment_index,
            max_batch_size,
            max_sequence_length,
            truncation,
            time_budget_ms,
            min_viable_scoring_time_ms,
            tau,
            tau_low,
            cost_smoothing,
        };
        config.validate().map_err(to_py_err)?;
        Ok(Self { inner: config })
    }

    /// Construct from JSON string.
    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        let config = AbstainConfig::from_json(json).map_err(to_py_err)?;
        config.validate().map_err(to_py_err)?;
        Ok(Self { inner: config })
    }

    #[getter]
    fn model_contradiction_index(&self) -> usize {
        self.inner.model_contradiction_index
    }

    #[getter]
    fn tau(&self) -> f64 {
        self.inner.tau
    }

    #[getter]
    fn tau_low(&self) -> Option<f64> {
        self.inner.tau_low
    }

    #[getter]
    fn time_budget_ms(&self) -> f64 {
        self.inner.time_budget_ms
    }

    #[getter]
    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size
    }

    fn __repr__(&self) -> String {
        format!(
            "AbstainConfig(contradiction={}, tau={}, tau_low={:?}, time_budget_ms={})",
            self.inner.model_contradiction_index,
            self.inner.tau,
            self.inner.tau_low,
            self.inner.time_budget_ms
        )
    }
}

// ─── PyDecisionRecord ───────────────────────────────────────────────

/// Python-visible decision plus the diagnostics behind it.
#[pyclass(name = "DecisionRecord")]
#[derive(Clone)]
struct PyDecisionRecord {
    inner: DiagnosticRecord,
}

#[pymethods]
impl PyDecisionRecord {
    #[getter]
    fn position(&self) -> usize {
        self.inner.position
    }

    #[getter]
    fn context(&self) -> &str {
        &self.inner.pair().context
    }

    #[getter]
    fn claim(&self) -> &str {
        &self.inner.pair().claim
    }

    /// "ANSWER", "ABSTAIN" or "CONFLICT".
    #[getter]
    fn verdict(&self) -> String {
        self.inner.verdict().to_string()
    }

    /// Raw model probability; None when the pair was never scored.
    #[getter]
    fn contradiction_probability(&self) -> Option<f64> {
        self.inner.scored().map(|s| s.contradiction_probability)
    }

    #[getter]
    fn entailment_probability(&self) -> Option<f64> {
        self.inner.scored().and_then(|s| s.entailment_probability)
    }

    #[getter]
    fn calibrated_probability(&self) -> Option<f64> {
        self.inner.decision.calibrated_probability
    }

    #[getter]
    fn tau(&self) -> f64 {
        self.inner.decision.tau
    }

    #[getter]
    fn tau_low(&self) -> Option<f64> {
        self.inner.decision.tau_low
    }

    /// Why the pair abstained unscored; None for scored pairs.
    #[getter]
    fn fallback_reason(&self) -> Option<String> {
        match self.inner.decision.basis {
            DecisionBasis::Fallback(reason) => Some(reason.to_string()),
            DecisionBasis::Scored => None,
        }
    }

    #[getter]
    fn truncated(&self) -> bool {
        self.inner.scored().is_some_and(|s| s.truncated)
    }

    #[getter]
    fn remaining_ms(&self) -> f64 {
        self.inner.decision.budget.remaining_ms
    }

    #[getter]
    fn contradicted(&self) -> Option<bool> {
        self.inner.contradicted
    }

    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        dict.set_item("position", self.position())?;
        dict.set_item("context", self.context())?;
        dict.set_item("claim", self.claim())?;
        dict.set_item("verdict", self.verdict())?;
        dict.set_item("contradiction_probability", self.contradiction_probability())?;
        dict.set_item("entailment_probability", self.entailment_probability())?;
        dict.set_item("calibrated_probability", self.calibrated_probability())?;
        dict.set_item("tau", self.tau())?;
        dict.set_item("tau_low", self.tau_low())?;
        dict.set_item("fallback_reason", self.fallback_reason())?;
        dict.set_item("truncated", self.truncated())?;
        dict.set_item("elapsed_ms", self.inner.decision.budget.elapsed_ms)?;
        dict.set_item("remaining_ms", self.remaining_ms())?;
        dict.set_item("contradicted", self.contradicted())?;
        Ok(dict)
    }

    fn __repr__(&self) -> String {
        format!(
            "DecisionRecord(position={}, verdict={}, p={:?}, reason={:?})",
            self.inner.position,
            self.inner.verdict(),
            self.calibrated_probability(),
            self.fallback_reason()
        )
    }
}

// ─── PyRequestOutcome ───────────────────────────────────────────────

/// Python-visible result of one pipeline request.
#[pyclass(name = "RequestOutcome")]
#[derive(Clone)]
struct PyRequestOutcome {
    inner: RequestOutcome,
}

#[pymethods]
impl PyRequestOutcome {
    #[getter]
    fn records(&self) -> Vec<PyDecisionRecord> {
        self.inner
            .records
            .iter()
            .cloned()
            .map(|inner| PyDecisionRecord { inner })
            .collect()
    }

    #[getter]
    fn verdicts(&self) -> Vec<String> {
        self.inner.verdicts().iter().map(ToString::to_string).collect()
    }

    #[getter]
    fn scorer_calls(&self) -> usize {
        self.inner.stats.scorer_calls
    }

    #[getter]
    fn scored_pairs(&self) -> usize {
        self.inner.stats.scored_pairs
    }

    #[getter]
    fn fallback_pairs(&self) -> usize {
        self.inner.stats.fallback_pairs
    }

    #[getter]
    fn elapsed_ms(&self) -> f64 {
        self.inner.stats.elapsed_ms
    }

    #[getter]
    fn final_state(&self) -> String {
        self.inner.stats.final_state.to_string()
    }

    /// Attach ground truth (True = claim actually contradicted), one
    /// label per record in order.
    fn with_ground_truth(&self, contradicted: Vec<bool>) -> PyResult<Self> {
        if contradicted.len() != self.inner.len() {
            return Err(PyValueError::new_err(format!(
                "expected {} labels, got {}",
                self.inner.len(),
                contradicted.len()
            )));
        }
        let mut inner = self.inner.clone();
        inner.records = inner
            .records
            .into_iter()
            .zip(contradicted)
            .map(|(record, truth)| record.with_ground_truth(truth))
            .collect();
        Ok(Self { inner })
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "RequestOutcome(pairs={}, scored={}, fallback={}, elapsed_ms={:.2}, state={})",
            self.inner.stats.pairs,
            self.inner.stats.scored_pairs,
            self.inner.stats.fallback_pairs,
            self.inner.stats.elapsed_ms,
            self.inner.stats.final_state
        )
    }
}

// ─── AbstentionPipeline ─────────────────────────────────────────────

fn template_for(name: &str, start_id: u32, sep_id: u32, pad_id: u32) -> PyResult<PairTemplate> {
    match name {
        "bert" => Ok(PairTemplate::bert(start_id, sep_id, pad_id)),
        "roberta" => Ok(PairTemplate::roberta(start_id, sep_id, pad_id)),
        other => Err(PyValueError::new_err(format!(
            "unknown pair template {other:?}; expected \"bert\" or \"roberta\""
        ))),
    }
}

fn python_backend(
    tokenize: PyObject,
    infer: PyObject,
    num_labels: usize,
    template: PairTemplate,
) -> ExternalNli {
    ExternalNli::new(
        num_labels,
        template,
        move |texts: &[&str]| {
            Python::with_gil(|py| {
                let out = tokenize
                    .call1(py, (texts.to_vec(),))
                    .map_err(|e| format!("tokenizer callback raised: {e}"))?;
                out.extract::<Vec<Vec<u32>>>(py)
                    .map_err(|e| format!("tokenizer callback returned bad ids: {e}"))
            })
        },
        move |batch: &EncodedBatch| {
            let mask: Vec<Vec<i64>> = batch
                .attention_mask()
                .iter()
                .map(|row| row.iter().map(|&m| i64::from(m)).collect())
                .collect();
            Python::with_gil(|py| {
                let out = infer
                    .call1(py, (batch.input_ids().to_vec(), mask))
                    .map_err(|e| format!("model callback raised: {e}"))?;
                out.extract::<Vec<Vec<f32>>>(py)
                    .map_err(|e| format!("model callback returned bad logits: {e}"))
            })
        },
    )
}

/// Latency-budgeted contradiction gate exposed to Python.
#[pyclass(name = "AbstentionPipeline")]
struct PyAbstentionPipeline {
    inner: AbstentionPipeline,
}

#[pymethods]
impl PyAbstentionPipeline {
    /// Create a pipeline.
    ///
    /// Args:
    ///     config: AbstainConfig. Required with model callbacks; may be
    ///             None only for the built-in heuristic backend.
    ///     tokenize: Callable[[list[str]], list[list[int]]] returning ids
    ///               without special tokens.
    ///     infer: Callable[[list[list[int]], list[list[int]]], list[list[float]]]
    ///            taking (input_ids, attention_mask), returning logits.
    ///     num_labels: Width of the model's logits (`model.config.num_labels`),
    ///                 required with model callbacks.
    ///     If both callbacks are None, the lexical heuristic backend is used.
    ///     template: "bert" or "roberta" pair layout.
    #[new]
    #[pyo3(signature = (
        config = None,
        tokenize = None,
        infer = None,
        num_labels = None,
        template = "bert",
        start_id = 101,
        sep_id = 102,
        pad_id = 0,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        config: Option<PyAbstainConfig>,
        tokenize: Option<PyObject>,
        infer: Option<PyObject>,
        num_labels: Option<usize>,
        template: &str,
        start_id: u32,
        sep_id: u32,
        pad_id: u32,
    ) -> PyResult<Self> {
        let (cfg, backend): (AbstainConfig, Arc<dyn NliBackend>) = match (tokenize, infer) {
            (Some(tokenize), Some(infer)) => {
                let cfg = config.map(|c| c.inner).ok_or_else(|| {
                    PyValueError::new_err(
                        "config with model_contradiction_index is required with model callbacks",
                    )
                })?;
                let num_labels = num_labels.ok_or_else(|| {
                    PyValueError::new_err("num_labels is required with model callbacks")
                })?;
                let template = template_for(template, start_id, sep_id, pad_id)?;
                let backend: Arc<dyn NliBackend> =
                    Arc::new(python_backend(tokenize, infer, num_labels, template));
                (cfg, backend)
            }
            (None, None) => {
                let cfg = config
                    .map(|c| c.inner)
                    .unwrap_or_else(|| AbstainConfig::for_model(HeuristicNli::CONTRADICTION));
                let backend: Arc<dyn NliBackend> = Arc::new(HeuristicNli::new());
                (cfg, backend)
            }
            _ => {
                return Err(PyValueError::new_err(
                    "tokenize and infer callbacks must be given together",
                ))
            }
        };

        Ok(Self {
            inner: AbstentionPipeline::new(cfg, backend).map_err(to_py_err)?,
        })
    }

    /// Decide a list of (context, claim) pairs within the latency budget.
    fn evaluate(&self, py: Python<'_>, pairs: Vec<(String, String)>) -> PyRequestOutcome {
        let pairs: Vec<Pair> = pairs
            .into_iter()
            .map(|(context, claim)| Pair::new(context, claim))
            .collect();
        let outcome = py.allow_threads(|| self.inner.evaluate(&pairs));
        PyRequestOutcome { inner: outcome }
    }

    /// Swap thresholds (and optionally a per-bucket curve built from
    /// observed contradiction rates) for subsequent requests.
    #[pyo3(signature = (tau, tau_low = None, bucket_rates = None))]
    fn recalibrate(
        &self,
        tau: f64,
        tau_low: Option<f64>,
        bucket_rates: Option<Vec<f64>>,
    ) -> PyResult<()> {
        let mut calibration = Calibration::new(tau, tau_low).map_err(to_py_err)?;
        if let Some(rates) = bucket_rates {
            let curve = CalibrationCurve::from_bins(&rates).map_err(to_py_err)?;
            calibration = calibration.with_curve(curve);
        }
        self.inner
            .calibration()
            .recalibrate(calibration)
            .map_err(to_py_err)
    }

    #[getter]
    fn tau(&self) -> f64 {
        self.inner.calibration().snapshot().calibration().tau
    }

    #[getter]
    fn config(&self) -> PyAbstainConfig {
        PyAbstainConfig {
            inner: self.inner.config().clone(),
        }
    }
}

// ─── Free functions ─────────────────────────────────────────────────

/// Classify one probability: "ANSWER", "ABSTAIN" or "CONFLICT".
#[pyfunction]
#[pyo3(signature = (probability, tau, tau_low = None))]
fn decide(probability: f64, tau: f64, tau_low: Option<f64>) -> PyResult<String> {
    decide_verdict(probability, tau, tau_low)
        .map(|v| v.to_string())
        .map_err(to_py_err)
}

fn summary_dict<'py>(
    py: Python<'py>,
    summary: &EvaluationSummary,
) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("records", summary.records)?;
    dict.set_item("scored", summary.scored)?;
    dict.set_item("ece", summary.ece)?;
    dict.set_item("roc_auc", summary.roc_auc)?;
    let curve: Vec<(f64, f64)> = summary
        .risk_coverage
        .iter()
        .map(|p| (p.coverage, p.risk))
        .collect();
    dict.set_item("risk_coverage", curve)?;
    dict.set_item("aurc", summary.aurc)?;
    dict.set_item("coverage", summary.coverage)?;
    dict.set_item("selective_risk", summary.selective_risk)?;
    dict.set_item("conflict_rate", summary.conflict_rate)?;
    dict.set_item("fallback_rate", summary.fallback_rate)?;
    dict.set_item("latency_p99_ms", summary.latency_p99_ms)?;
    Ok(dict)
}

/// Evaluate labelled request outcomes (see `RequestOutcome.with_ground_truth`).
///
/// Returns a dict with ece, roc_auc, risk_coverage, aurc, coverage,
/// selective_risk, conflict_rate, fallback_rate, latency_p99_ms.
#[pyfunction]
#[pyo3(signature = (outcomes, bins = 10))]
fn evaluate<'py>(
    py: Python<'py>,
    outcomes: Vec<PyRequestOutcome>,
    bins: usize,
) -> PyResult<Bound<'py, PyDict>> {
    let outcomes: Vec<RequestOutcome> = outcomes.into_iter().map(|o| o.inner).collect();
    let adapter = EvaluationAdapter::new(StandardMetrics::with_bins(bins));
    let summary = adapter.evaluate_requests(&outcomes).map_err(to_py_err)?;
    summary_dict(py, &summary)
}

// ─── Module ─────────────────────────────────────────────────────────

#[pymodule]
fn abstain_kernel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyAbstainConfig>()?;
    m.add_class::<PyDecisionRecord>()?;
    m.add_class::<PyRequestOutcome>()?;
    m.add_class::<PyAbstentionPipeline>()?;
    m.add_function(wrap_pyfunction!(decide, m)?)?;
    m.add_function(wrap_pyfunction!(evaluate, m)?)?;
    Ok(())
}
