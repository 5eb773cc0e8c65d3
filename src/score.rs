//! Score computation primitives.
//!
//! Four pure contracts: a per-feature Z-score, the mean-of-absolute-values
//! combination law used at every aggregation level above the leaf, and the
//! two range variants (boolean pass/fail and signed distance). Determinism
//! and referential transparency here are what make test reports
//! reproducible.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quantity::{Quantity, Unit};

/// What a score value represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Signed per-feature Z-score.
    ZScore,
    /// Mean of absolute Z-scores across a feature set.
    CombinedZScore,
    /// Boolean range membership (1.0 = pass, 0.0 = fail).
    RangeCheck,
    /// Distance to the nearer bound, 0.0 inside the range.
    RangeScore,
}

/// One computed score plus its kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreValue {
    pub score: f64,
    pub kind: ScoreKind,
}

impl ScoreValue {
    pub fn zscore(score: f64) -> Self {
        Self {
            score,
            kind: ScoreKind::ZScore,
        }
    }
}

/// Errors from the score engine.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Operands carry different units; the caller must normalize first.
    #[error("dimension mismatch: observed in {observed:?}, predicted in {predicted:?}")]
    Dimension { observed: Unit, predicted: Unit },

    /// A true zero std reached the engine. The normalizer floors zero stds,
    /// so this is an upstream invariant violation, not a user input error.
    #[error("zero standard deviation reached the score engine")]
    DivisionByZero,

    /// `combine` over an empty sequence; the mean is undefined.
    #[error("cannot combine an empty sequence of scores")]
    EmptyInput,
}

/// Signed Z-score of a predicted value against an observed mean/std.
///
/// Both operands must carry the same unit; the engine does not convert.
pub fn zscore(mean: Quantity, std: Quantity, value: Quantity) -> Result<f64, ScoreError> {
    if mean.unit != value.unit || std.unit != value.unit {
        return Err(ScoreError::Dimension {
            observed: mean.unit,
            predicted: value.unit,
        });
    }
    if std.number == 0.0 {
        return Err(ScoreError::DivisionByZero);
    }
    Ok((value.number - mean.number) / std.number)
}

/// Mean of absolute values: the single combination law for score sets.
pub fn combine(scores: &[f64]) -> Result<f64, ScoreError> {
    if scores.is_empty() {
        return Err(ScoreError::EmptyInput);
    }
    Ok(scores.iter().map(|s| s.abs()).sum::<f64>() / scores.len() as f64)
}

/// Inclusive range membership check.
pub fn range_check(min: Quantity, max: Quantity, value: Quantity) -> Result<bool, ScoreError> {
    check_bounds_units(min, max, value)?;
    Ok(value.number >= min.number && value.number <= max.number)
}

/// Distance to the nearer bound; 0.0 when the value lies inside the range.
///
/// Non-negative by construction since exactly one branch applies.
pub fn range_score(min: Quantity, max: Quantity, value: Quantity) -> Result<f64, ScoreError> {
    check_bounds_units(min, max, value)?;
    if value.number < min.number {
        Ok(min.number - value.number)
    } else if value.number > max.number {
        Ok(value.number - max.number)
    } else {
        Ok(0.0)
    }
}

fn check_bounds_units(min: Quantity, max: Quantity, value: Quantity) -> Result<(), ScoreError> {
    if min.unit != value.unit || max.unit != value.unit {
        return Err(ScoreError::Dimension {
            observed: min.unit,
            predicted: value.unit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Unit;

    fn um(n: f64) -> Quantity {
        Quantity::new(n, Unit::Um)
    }

    #[test]
    fn zscore_sign_and_magnitude() {
        assert_eq!(zscore(um(10.0), um(2.0), um(14.0)).unwrap(), 2.0);
        assert_eq!(zscore(um(10.0), um(2.0), um(6.0)).unwrap(), -2.0);
    }

    #[test]
    fn zscore_rejects_mixed_units() {
        let err = zscore(um(10.0), um(2.0), Quantity::new(14.0, Unit::Mm)).unwrap_err();
        assert!(matches!(err, ScoreError::Dimension { .. }));
    }

    #[test]
    fn zscore_rejects_true_zero_std() {
        let err = zscore(um(10.0), um(0.0), um(14.0)).unwrap_err();
        assert!(matches!(err, ScoreError::DivisionByZero));
    }

    #[test]
    fn combine_is_mean_of_absolute_values() {
        assert_eq!(combine(&[2.0]).unwrap(), 2.0);
        assert_eq!(combine(&[-2.0]).unwrap(), 2.0);
        assert_eq!(combine(&[2.0, -2.0]).unwrap(), 2.0);
        assert_eq!(combine(&[1.0, -3.0]).unwrap(), 2.0);
    }

    #[test]
    fn combine_rejects_empty_input() {
        assert!(matches!(combine(&[]).unwrap_err(), ScoreError::EmptyInput));
    }

    #[test]
    fn range_check_bounds_are_inclusive() {
        assert!(range_check(um(5.0), um(10.0), um(5.0)).unwrap());
        assert!(range_check(um(5.0), um(10.0), um(10.0)).unwrap());
        assert!(!range_check(um(5.0), um(10.0), um(10.0001)).unwrap());
    }

    #[test]
    fn range_score_is_distance_to_nearer_bound() {
        assert_eq!(range_score(um(5.0), um(10.0), um(12.0)).unwrap(), 2.0);
        assert_eq!(range_score(um(5.0), um(10.0), um(3.0)).unwrap(), 2.0);
        assert_eq!(range_score(um(5.0), um(10.0), um(7.0)).unwrap(), 0.0);
    }
}
