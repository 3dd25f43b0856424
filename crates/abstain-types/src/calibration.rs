// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Abstention Kernel Calibration State
// ─────────────────────────────────────────────────────────────────────
//! Decision thresholds and the optional raw → calibrated probability
//! map consumed by the decision engine.

use serde::{Deserialize, Serialize};

use crate::error::{AbstainError, AbstainResult};
use crate::score::clamp_score;

/// Check `tau ∈ [0, 1]` and `tau_low ∈ [0, tau]`.
pub fn validate_thresholds(tau: f64, tau_low: Option<f64>) -> AbstainResult<()> {
    if !(0.0..=1.0).contains(&tau) {
        return Err(AbstainError::InvalidThreshold(format!(
            "tau must be in [0, 1], got {tau}"
        )));
    }
    if let Some(low) = tau_low {
        if !(0.0..=1.0).contains(&low) {
            return Err(AbstainError::InvalidThreshold(format!(
                "tau_low must be in [0, 1], got {low}"
            )));
        }
        if low > tau {
            return Err(AbstainError::InvalidThreshold(format!(
                "tau_low ({low}) must not exceed tau ({tau})"
            )));
        }
    }
    Ok(())
}

/// One knot of a calibration curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Raw model contradiction probability.
    pub raw: f64,
    /// Calibrated probability reported for `raw`.
    pub calibrated: f64,
}

/// Monotone piecewise-linear calibration map.
///
/// Outside the first/last knot the end values are held constant.
/// Calibrated values must be non-decreasing so that a higher raw
/// contradiction never yields a more permissive decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveKnots")]
pub struct CalibrationCurve {
    points: Vec<CurvePoint>,
}

/// Wire form of a curve; only reaches callers through validation.
#[derive(Deserialize)]
struct CurveKnots {
    points: Vec<CurvePoint>,
}

impl TryFrom<CurveKnots> for CalibrationCurve {
    type Error = AbstainError;

    fn try_from(knots: CurveKnots) -> AbstainResult<Self> {
        Self::from_points(knots.points)
    }
}

impl CalibrationCurve {
    pub fn from_points(points: Vec<CurvePoint>) -> AbstainResult<Self> {
        let curve = Self { points };
        curve.validate()?;
        Ok(curve)
    }

    /// Histogram-binning curve: `rates[i]` is the empirical contradiction
    /// rate of the i-th equal-width bucket over [0, 1], placed at the
    /// bucket centre.
    pub fn from_bins(rates: &[f64]) -> AbstainResult<Self> {
        if rates.is_empty() {
            return Err(AbstainError::InvalidCalibration(
                "at least one bucket rate is required".to_string(),
            ));
        }
        let width = 1.0 / rates.len() as f64;
        let mut points: Vec<CurvePoint> = rates
            .iter()
            .enumerate()
            .map(|(i, &calibrated)| CurvePoint {
                raw: (i as f64 + 0.5) * width,
                calibrated,
            })
            .collect();
        if points.len() == 1 {
            // Single bucket: flat map over the whole interval.
            let only = points[0].calibrated;
            points = vec![
                CurvePoint { raw: 0.0, calibrated: only },
                CurvePoint { raw: 1.0, calibrated: only },
            ];
        }
        Self::from_points(points)
    }

    pub fn validate(&self) -> AbstainResult<()> {
        if self.points.len() < 2 {
            return Err(AbstainError::InvalidCalibration(format!(
                "curve needs at least 2 points, got {}",
                self.points.len()
            )));
        }
        for p in &self.points {
            if !(0.0..=1.0).contains(&p.raw) || !(0.0..=1.0).contains(&p.calibrated) {
                return Err(AbstainError::InvalidCalibration(format!(
                    "curve point ({}, {}) outside [0, 1]",
                    p.raw, p.calibrated
                )));
            }
        }
        for w in self.points.windows(2) {
            if w[1].raw <= w[0].raw {
                return Err(AbstainError::InvalidCalibration(format!(
                    "raw knots must be strictly increasing ({} then {})",
                    w[0].raw, w[1].raw
                )));
            }
            if w[1].calibrated < w[0].calibrated {
                return Err(AbstainError::InvalidCalibration(format!(
                    "calibrated values must be non-decreasing ({} then {})",
                    w[0].calibrated, w[1].calibrated
                )));
            }
        }
        Ok(())
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Map a raw probability through the curve.
    pub fn apply(&self, raw: f64) -> f64 {
        let raw = clamp_score(raw, 0.0, 1.0);
        let (Some(&first), Some(&last)) = (self.points.first(), self.points.last()) else {
            return raw;
        };
        if raw <= first.raw {
            return first.calibrated;
        }
        if raw >= last.raw {
            return last.calibrated;
        }
        // First knot strictly above raw; the one before it is <= raw.
        let hi = self.points.partition_point(|p| p.raw <= raw);
        let (a, b) = (self.points[hi - 1], self.points[hi]);
        let t = (raw - a.raw) / (b.raw - a.raw);
        clamp_score(a.calibrated + t * (b.calibrated - a.calibrated), 0.0, 1.0)
    }
}

/// Threshold state in effect for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Contradiction at or above tau abstains.
    pub tau: f64,
    /// Contradiction below tau_low answers; `None` collapses to tau.
    pub tau_low: Option<f64>,
    /// Optional raw → calibrated map applied before thresholding.
    #[serde(default)]
    pub curve: Option<CalibrationCurve>,
}

impl Calibration {
    pub fn new(tau: f64, tau_low: Option<f64>) -> AbstainResult<Self> {
        validate_thresholds(tau, tau_low)?;
        Ok(Self {
            tau,
            tau_low,
            curve: None,
        })
    }

    pub fn with_curve(mut self, curve: CalibrationCurve) -> Self {
        self.curve = Some(curve);
        self
    }

    /// Re-check an instance that may have been deserialized.
    pub fn validate(&self) -> AbstainResult<()> {
        validate_thresholds(self.tau, self.tau_low)?;
        if let Some(curve) = &self.curve {
            curve.validate()?;
        }
        Ok(())
    }

    /// Effective lower bound of the CONFLICT zone.
    pub fn lower_bound(&self) -> f64 {
        self.tau_low.unwrap_or(self.tau)
    }

    /// Calibrated contradiction probability for a raw model output.
    pub fn apply(&self, raw: f64) -> f64 {
        match &self.curve {
            Some(curve) => curve.apply(raw),
            None => clamp_score(raw, 0.0, 1.0),
        }
    }
}
