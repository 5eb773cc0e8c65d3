//! Hierarchical reduction of feature scores.
//!
//! Leaf Z-scores roll up per cell via the mean-of-absolute-values law, and
//! per-cell scalars roll up via an arithmetic mean into the run's single
//! overall score. Every intermediate level is kept in the [`ScoreTree`] for
//! reporting; the tree is built once per run and never mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{FeatureTree, FeatureValue};
use crate::score::{self, ScoreError, ScoreValue};

/// Scores for one cell: per-part leaf scores plus the injected aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellScores {
    #[serde(flatten)]
    pub parts: BTreeMap<String, BTreeMap<String, ScoreValue>>,

    /// Mean of absolute Z-scores across this cell's features.
    #[serde(rename = "A mean |Z-score|")]
    pub mean_abs_zscore: f64,
}

/// Mirrors the feature tree with score leaves and per-level aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTree {
    #[serde(flatten)]
    pub cells: BTreeMap<String, CellScores>,
}

/// Errors from the aggregation pipeline.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Score(#[from] ScoreError),

    /// No feature was scorable across all prediction cells.
    #[error("no overlapping features between observation and prediction")]
    InsufficientData,

    /// The observation tree has no reference cell entry.
    #[error("observation contains no reference cell")]
    EmptyObservation,

    /// A leaf had the wrong variant for its side of the comparison.
    #[error("shape mismatch at {path}: expected {expected} statistics")]
    ShapeMismatch { path: String, expected: &'static str },
}

/// Score a prediction tree against an observation's reference entry.
///
/// For each prediction cell, every cell part and feature also present in the
/// observation reference contributes one Z-score; features or parts absent
/// from a prediction cell are skipped rather than rejected, tolerating
/// partial model output. Only a total absence of scorable features is fatal.
pub fn aggregate(
    observation: &FeatureTree,
    prediction: &FeatureTree,
) -> Result<(ScoreTree, f64), AggregateError> {
    let (_, reference) = observation
        .reference_cell()
        .ok_or(AggregateError::EmptyObservation)?;

    let mut tree = ScoreTree::default();
    let mut cell_means = Vec::new();

    for (cell_id, parts) in &prediction.cells {
        let mut cell_scores = Vec::new();
        let mut part_map: BTreeMap<String, BTreeMap<String, ScoreValue>> = BTreeMap::new();

        for (part, features) in parts {
            let Some(reference_features) = reference.get(part) else {
                continue;
            };
            for (feature, predicted) in features {
                let Some(observed) = reference_features.get(feature) else {
                    continue;
                };
                let path = format!("{cell_id}/{part}/{feature}");
                let score = leaf_zscore(&path, observed, predicted)?;
                cell_scores.push(score);
                part_map
                    .entry(part.clone())
                    .or_default()
                    .insert(feature.clone(), ScoreValue::zscore(score));
            }
        }

        if cell_scores.is_empty() {
            tracing::warn!(cell = %cell_id, "no scorable features for cell, skipping");
            continue;
        }
        let mean_abs = score::combine(&cell_scores)?;
        cell_means.push(mean_abs);
        tree.cells.insert(
            cell_id.clone(),
            CellScores {
                parts: part_map,
                mean_abs_zscore: mean_abs,
            },
        );
    }

    if cell_means.is_empty() {
        return Err(AggregateError::InsufficientData);
    }
    let overall = cell_means.iter().sum::<f64>() / cell_means.len() as f64;
    Ok((tree, overall))
}

/// Degenerate single-leaf instance of the same law: one observed/predicted
/// pair, whose signed Z-score is the overall score.
pub fn score_single(
    path: &str,
    observed: &FeatureValue,
    predicted: &FeatureValue,
) -> Result<f64, AggregateError> {
    leaf_zscore(path, observed, predicted)
}

fn leaf_zscore(
    path: &str,
    observed: &FeatureValue,
    predicted: &FeatureValue,
) -> Result<f64, AggregateError> {
    let (mean, std) = observed
        .as_observed()
        .ok_or_else(|| AggregateError::ShapeMismatch {
            path: path.to_string(),
            expected: "{mean, std}",
        })?;
    let value = predicted
        .as_predicted()
        .ok_or_else(|| AggregateError::ShapeMismatch {
            path: path.to_string(),
            expected: "{value}",
        })?;
    Ok(score::zscore(mean, std, value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_tree;
    use serde_json::json;

    fn observation() -> FeatureTree {
        normalize_tree(&json!({
            "int_pyramidal": {
                "axon": {
                    "total_axon_length": { "mean": "10.0 um", "std": "2.0 um" },
                    "max_branch_order": { "mean": "10.0", "std": "2.0" }
                },
                "basal_dendrite": {
                    "total_dendrite_length": { "mean": "10.0 um", "std": "2.0 um" },
                    "total_number_of_neurites": { "mean": "10.0", "std": "2.0" }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn zero_deviation_prediction_scores_zero() {
        let prediction = normalize_tree(&json!({
            "cell_01": {
                "axon": {
                    "total_axon_length": { "value": "10.0 um" },
                    "max_branch_order": { "value": "10.0" }
                },
                "basal_dendrite": {
                    "total_dendrite_length": { "value": "10.0 um" },
                    "total_number_of_neurites": { "value": "10.0" }
                }
            }
        }))
        .unwrap();

        let (tree, overall) = aggregate(&observation(), &prediction).unwrap();
        assert_eq!(overall, 0.0);
        assert_eq!(tree.cells["cell_01"].mean_abs_zscore, 0.0);
        assert_eq!(tree.cells["cell_01"].parts["axon"].len(), 2);
    }

    #[test]
    fn missing_feature_is_skipped_not_rejected() {
        let prediction = normalize_tree(&json!({
            "cell_01": {
                "axon": { "total_axon_length": { "value": "14.0 um" } }
            }
        }))
        .unwrap();

        let (tree, overall) = aggregate(&observation(), &prediction).unwrap();
        // Only the one overlapping feature was scored: |z| = 2.0.
        assert_eq!(overall, 2.0);
        assert_eq!(tree.cells["cell_01"].parts["axon"].len(), 1);
    }

    #[test]
    fn zero_overlap_is_insufficient_data() {
        let prediction = normalize_tree(&json!({
            "cell_01": {
                "apical_dendrite": { "total_dendrite_volume": { "value": "4.0 um3" } }
            }
        }))
        .unwrap();

        let err = aggregate(&observation(), &prediction).unwrap_err();
        assert!(matches!(err, AggregateError::InsufficientData));
    }

    #[test]
    fn overall_is_mean_of_per_cell_means() {
        let prediction = normalize_tree(&json!({
            "cell_01": { "axon": { "total_axon_length": { "value": "14.0 um" } } },
            "cell_02": { "axon": { "total_axon_length": { "value": "10.0 um" } } }
        }))
        .unwrap();

        let (tree, overall) = aggregate(&observation(), &prediction).unwrap();
        assert_eq!(tree.cells["cell_01"].mean_abs_zscore, 2.0);
        assert_eq!(tree.cells["cell_02"].mean_abs_zscore, 0.0);
        assert_eq!(overall, 1.0);
    }
}
