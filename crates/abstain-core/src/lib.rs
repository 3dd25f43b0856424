// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Core Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Batched NLI contradiction scoring, latency governance, and
//! calibrated ANSWER / ABSTAIN / CONFLICT decisions.
//!
//! A request flows budget → governor → scorer → decision engine and
//! always yields one decision per input pair, in input order, within
//! the configured latency budget.
//!
//! # Safety Invariants
//!
//! 1. **Unscored never answers**: a pair without a usable model score
//!    (budget exhausted, scorer timeout, inference failure, overlong
//!    input, non-finite output) resolves to ABSTAIN with its reason
//!    recorded.
//!
//! 2. **Ties favour caution**: `p == tau` abstains, and a NaN
//!    probability abstains.
//!
//! 3. **Fallback is terminal per request**: once the remaining budget
//!    drops below `min_viable_scoring_time_ms`, no further scorer call
//!    is made for that request.
//!
//! 4. **Calibration is swapped, never mutated**: a request decides
//!    against the snapshot taken at entry, and an invalid recalibration
//!    is rejected before it becomes visible.

pub mod batch;
pub mod budget;
pub mod decision;
pub mod governor;
pub mod nli;
pub mod pipeline;
pub mod scorer;

pub use batch::{Batch, PairBatcher};
pub use budget::{Budget, Clock, ManualClock, SystemClock};
pub use decision::{decide, CalibrationStore, DecisionEngine};
pub use governor::{GovernedPair, GovernorReport, LatencyGovernor, Resolution};
pub use nli::{softmax, EncodedBatch, ExternalNli, HeuristicNli, NliBackend, PairTemplate};
pub use pipeline::AbstentionPipeline;
pub use scorer::{BatchScorer, ContradictionScorer, PairScore};
