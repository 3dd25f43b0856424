// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Evaluation
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Evaluation adapter for abstention diagnostics.
//!
//! Converts decision records plus caller-supplied ground truth into
//! inputs for calibration error, ROC-AUC, and risk-coverage metrics,
//! and aggregates coverage, conflict, fallback, and latency figures.

pub mod adapter;
pub mod metrics;

pub use adapter::{percentile, EvaluationAdapter, EvaluationSummary, MetricInputs};
pub use metrics::{MetricSuite, RiskCoveragePoint, StandardMetrics};
