//! Normalization of raw observation and prediction trees.
//!
//! Raw input is a three-level string-keyed mapping
//! (`cell -> cell part -> feature -> leaf`) whose leaves hold string-encoded
//! quantities. Normalization parses every leaf into a typed [`FeatureValue`],
//! enforces the structural shape, and (on the prediction side) reconciles the
//! naming quirks of the external statistics tool: path artifacts in cell
//! identifiers, radius-vs-diameter features, flat feature names that belong
//! under a synthetic cell part, and pluralization stripped from requested
//! feature names.
//!
//! Normalization is idempotent: a [`FeatureTree`] serialized back to JSON
//! re-normalizes to an identical tree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::quantity::{DimensionClass, Quantity, QuantityError};

/// Cell parts accepted by the morphology-statistics nomenclature.
pub const CELL_PARTS: &[&str] = &["soma", "axon", "apical_dendrite", "basal_dendrite", "neuron"];

/// Statistical mode prefixes accepted in `<mode>_<feature>` names.
pub const STAT_MODES: &[&str] = &["min", "max", "median", "mean", "total", "std"];

/// Neurite features computed outside the statistics tool; these carry no
/// statistical-mode prefix.
pub const EXTRA_NEURITE_FEATURES: &[&str] = &[
    "neurite_field_diameter",
    "neurite_largest_extent",
    "neurite_shortest_extent",
    "neurite_X_extent",
    "neurite_Y_extent",
    "neurite_Z_extent",
];

// =============================================================================
// Typed trees
// =============================================================================

/// One feature's statistics, either side of the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Experimental reference: mean and standard deviation.
    Observed { mean: Quantity, std: Quantity },
    /// Experimental reference: an acceptance range.
    ObservedRange { min: Quantity, max: Quantity },
    /// Model output: a single measured value.
    Predicted { value: Quantity },
}

impl FeatureValue {
    pub fn as_observed(&self) -> Option<(Quantity, Quantity)> {
        match self {
            FeatureValue::Observed { mean, std } => Some((*mean, *std)),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<(Quantity, Quantity)> {
        match self {
            FeatureValue::ObservedRange { min, max } => Some((*min, *max)),
            _ => None,
        }
    }

    pub fn as_predicted(&self) -> Option<Quantity> {
        match self {
            FeatureValue::Predicted { value } => Some(*value),
            _ => None,
        }
    }
}

/// Feature name to value, within one cell part.
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// Cell part to features, within one cell.
pub type PartMap = BTreeMap<String, FeatureMap>;

/// Normalized three-level tree: cell identifier -> cell part -> feature.
///
/// Key order is irrelevant to scoring; `BTreeMap` keeps traversal and
/// serialization deterministic for reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTree {
    #[serde(flatten)]
    pub cells: BTreeMap<String, PartMap>,
}

impl FeatureTree {
    /// The reference entry of an observation tree (its single cell kind).
    pub fn reference_cell(&self) -> Option<(&str, &PartMap)> {
        self.cells
            .iter()
            .next()
            .map(|(name, parts)| (name.as_str(), parts))
    }

    /// Total number of feature leaves.
    pub fn leaf_count(&self) -> usize {
        self.cells
            .values()
            .flat_map(|parts| parts.values())
            .map(|features| features.len())
            .sum()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while normalizing or validating a tree.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A leaf quantity failed to parse; `path` is `cell/part/feature`.
    #[error("at {path}: {source}")]
    Quantity {
        path: String,
        #[source]
        source: QuantityError,
    },

    /// Structural mismatch between expected and actual tree shape.
    #[error("invalid tree structure at {path}: {reason}")]
    Validation { path: String, reason: String },
}

impl NormalizeError {
    fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Parse a raw three-level tree into a [`FeatureTree`].
///
/// Leaf dictionaries are routed by key set: `{mean, std}` and `{min, max}`
/// become observation variants, `{value}` a prediction. Every leaf entry must
/// be either a `"<number> <unit>"` string or an already-normalized quantity
/// object; anything else fails with the offending path named.
pub fn normalize_tree(raw: &Value) -> Result<FeatureTree, NormalizeError> {
    let cells = raw
        .as_object()
        .ok_or_else(|| NormalizeError::validation("<root>", "expected an object of cells"))?;

    let mut tree = FeatureTree::default();
    for (cell, parts_value) in cells {
        let parts = parts_value
            .as_object()
            .ok_or_else(|| NormalizeError::validation(cell, "expected an object of cell parts"))?;

        let mut part_map = PartMap::new();
        for (part, features_value) in parts {
            let features = features_value.as_object().ok_or_else(|| {
                NormalizeError::validation(format!("{cell}/{part}"), "expected an object of features")
            })?;

            let mut feature_map = FeatureMap::new();
            for (feature, leaf) in features {
                let path = format!("{cell}/{part}/{feature}");
                let value = normalize_leaf(&path, feature, leaf)?;
                feature_map.insert(feature.clone(), value);
            }
            part_map.insert(part.clone(), feature_map);
        }
        tree.cells.insert(cell.clone(), part_map);
    }
    Ok(tree)
}

fn normalize_leaf(path: &str, feature: &str, leaf: &Value) -> Result<FeatureValue, NormalizeError> {
    let entries = leaf
        .as_object()
        .ok_or_else(|| NormalizeError::validation(path, "expected a statistics object"))?;
    let expected = DimensionClass::of_feature(feature);

    let get = |key: &str| -> Result<Option<Quantity>, NormalizeError> {
        entries
            .get(key)
            .map(|v| parse_leaf_entry(path, v, expected))
            .transpose()
    };

    if let (Some(mean), Some(std)) = (get("mean")?, get("std")?) {
        // Zero variance would make the Z-score undefined; floor it once here
        // so the score engine never sees a true zero.
        let std = if std.number == 0.0 {
            Quantity::new(1.0, std.unit)
        } else {
            std
        };
        return Ok(FeatureValue::Observed { mean, std });
    }
    if let (Some(min), Some(max)) = (get("min")?, get("max")?) {
        return Ok(FeatureValue::ObservedRange { min, max });
    }
    if let Some(value) = get("value")? {
        return Ok(FeatureValue::Predicted { value });
    }
    Err(NormalizeError::validation(
        path,
        "expected {mean, std}, {min, max} or {value} keys",
    ))
}

fn parse_leaf_entry(
    path: &str,
    entry: &Value,
    expected: DimensionClass,
) -> Result<Quantity, NormalizeError> {
    let wrap = |source| NormalizeError::Quantity {
        path: path.to_string(),
        source,
    };
    match entry {
        Value::String(raw) => Quantity::parse(raw, expected).map_err(wrap),
        // Already-normalized form; re-check the dimension and pass through.
        Value::Object(_) => {
            let quantity: Quantity = serde_json::from_value(entry.clone()).map_err(|_| {
                NormalizeError::validation(path, "expected a {number, unit} quantity object")
            })?;
            quantity.check_dimension(expected).map_err(wrap)
        }
        _ => Err(NormalizeError::validation(
            path,
            "expected a quantity string or object",
        )),
    }
}

// =============================================================================
// Shape validation
// =============================================================================

/// Require every leaf to be an observation variant (mean/std or min/max).
pub fn validate_observation(tree: &FeatureTree) -> Result<(), NormalizeError> {
    for_each_leaf(tree, |path, value| match value {
        FeatureValue::Predicted { .. } => Err(NormalizeError::validation(
            path,
            "observations must carry {mean, std} or {min, max}, not {value}",
        )),
        _ => Ok(()),
    })
}

/// Require every leaf to be a prediction variant.
pub fn validate_prediction(tree: &FeatureTree) -> Result<(), NormalizeError> {
    for_each_leaf(tree, |path, value| match value {
        FeatureValue::Predicted { .. } => Ok(()),
        _ => Err(NormalizeError::validation(
            path,
            "predictions must carry a single {value}",
        )),
    })
}

fn for_each_leaf(
    tree: &FeatureTree,
    mut f: impl FnMut(&str, &FeatureValue) -> Result<(), NormalizeError>,
) -> Result<(), NormalizeError> {
    for (cell, parts) in &tree.cells {
        for (part, features) in parts {
            for (feature, value) in features {
                f(&format!("{cell}/{part}/{feature}"), value)?;
            }
        }
    }
    Ok(())
}

/// Check a raw morphology observation against the statistics-tool
/// nomenclature before any formatting: known cell parts, and
/// `<stat_mode>_<feature>` names with a closed stat-mode set. Features from
/// [`EXTRA_NEURITE_FEATURES`] are accepted verbatim.
pub fn check_nomenclature(raw: &Value) -> Result<(), NormalizeError> {
    let cells = raw
        .as_object()
        .ok_or_else(|| NormalizeError::validation("<root>", "expected an object of cells"))?;

    for (cell, parts_value) in cells {
        let parts = parts_value
            .as_object()
            .ok_or_else(|| NormalizeError::validation(cell, "expected an object of cell parts"))?;
        for (part, features_value) in parts {
            if !CELL_PARTS.contains(&part.as_str()) {
                return Err(NormalizeError::validation(
                    format!("{cell}/{part}"),
                    format!("unknown cell part; expected one of {CELL_PARTS:?}"),
                ));
            }
            let features = features_value.as_object().ok_or_else(|| {
                NormalizeError::validation(format!("{cell}/{part}"), "expected an object of features")
            })?;
            for feature in features.keys() {
                if EXTRA_NEURITE_FEATURES.contains(&feature.as_str()) {
                    continue;
                }
                let mode = feature.split('_').next().unwrap_or("");
                if !STAT_MODES.contains(&mode) {
                    return Err(NormalizeError::validation(
                        format!("{cell}/{part}/{feature}"),
                        format!(
                            "feature names must start with a statistical mode prefix, one of {STAT_MODES:?}"
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Prediction reconciliation
// =============================================================================

/// Rework raw statistics-tool output into the observation's naming scheme.
///
/// The tool emits per-cell mappings whose keys mix real cell parts (axon,
/// dendrites) with flat feature names, drops trailing plurals from requested
/// feature names, reports radii where observations use diameters, and keys
/// cells by morphology file path. This pass fixes all four and attaches unit
/// suffixes, producing the raw shape [`normalize_tree`] expects.
///
/// `requested` is the set of feature names from the original configuration
/// request; tool-side singulars are restored to the requested plural form.
pub fn reconcile_prediction(raw: &Value, requested: &BTreeSet<String>) -> Value {
    let Some(cells) = raw.as_object() else {
        return raw.clone();
    };

    let mut out = serde_json::Map::new();
    for (cell_id, cell_value) in cells {
        let cell_id = strip_cell_id_artifacts(cell_id);
        let Some(entries) = cell_value.as_object() else {
            out.insert(cell_id, cell_value.clone());
            continue;
        };

        // Route flat feature names under a synthetic part; keep real parts.
        let mut parts: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (key, value) in entries {
            if is_cell_part(key) {
                if let Some(features) = value.as_object() {
                    parts
                        .entry(key.clone())
                        .or_default()
                        .extend(features.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            } else {
                let part = if key.contains("soma") { "soma" } else { "neuron" };
                parts
                    .entry(part.to_string())
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
        }

        let mut part_map = serde_json::Map::new();
        for (part, features) in parts {
            let mut feature_map = serde_json::Map::new();
            for (name, value) in features {
                let (name, value) = radius_to_diameter(&name, value);
                let name = restore_plural(&name, requested);
                let leaf = attach_units_leaf(&name, value);
                feature_map.insert(name, leaf);
            }
            part_map.insert(part, Value::Object(feature_map));
        }
        out.insert(cell_id, Value::Object(part_map));
    }
    Value::Object(out)
}

fn is_cell_part(key: &str) -> bool {
    CELL_PARTS.contains(&key) || key.contains("axon") || key.contains("dendrite")
}

/// Strip directory and extension artifacts from a tool-emitted cell id
/// (e.g. `"morphologies/cell_037.swc"` -> `"cell_037"`).
fn strip_cell_id_artifacts(cell_id: &str) -> String {
    Path::new(cell_id)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(cell_id)
        .to_string()
}

/// The tool measures radii; observations are stated as diameters. Rename and
/// double the value. Applies only to bare numeric leaves, and the rename only
/// together with the doubling, so it happens exactly once: a reconciled name
/// no longer contains `radius`/`radii`.
fn radius_to_diameter(name: &str, value: Value) -> (String, Value) {
    if !name.contains("radius") && !name.contains("radii") {
        return (name.to_string(), value);
    }
    let Some(n) = value.as_f64() else {
        return (name.to_string(), value);
    };
    let renamed = name.replace("radius", "diameter").replace("radii", "diameter");
    (renamed, Value::from(n * 2.0))
}

/// Restore a plural feature name the tool reported in singular form.
fn restore_plural(name: &str, requested: &BTreeSet<String>) -> String {
    if requested.contains(name) {
        return name.to_string();
    }
    let plural = format!("{name}s");
    if requested.contains(&plural) {
        return plural;
    }
    name.to_string()
}

/// Wrap a bare numeric leaf as `{"value": "<number> <unit>"}`, choosing the
/// unit suffix from the dimension class the feature name implies. The tool
/// reports micrometre-based magnitudes, so length-like features get `um`,
/// areas `um2`, volumes `um3`, angles `degree`, and dimensionless features no
/// suffix. A leaf that is already a statistics object passes through
/// untouched, so running reconciliation over an already-shaped tree changes
/// nothing.
fn attach_units_leaf(name: &str, value: Value) -> Value {
    if value.is_object() {
        return value;
    }
    let Some(n) = value.as_f64() else {
        return serde_json::json!({ "value": value });
    };
    let suffix = match DimensionClass::of_feature(name) {
        DimensionClass::Length => "um",
        DimensionClass::Area => "um2",
        DimensionClass::Volume => "um3",
        DimensionClass::Angle => "degree",
        DimensionClass::Dimensionless => "",
    };
    let rendered = if suffix.is_empty() {
        n.to_string()
    } else {
        format!("{n} {suffix}")
    };
    serde_json::json!({ "value": rendered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Unit;
    use serde_json::json;

    #[test]
    fn normalize_routes_leaf_variants() {
        let raw = json!({
            "int_pyramidal": {
                "soma": {
                    "mean_soma_diameter": { "mean": "12.0 um", "std": "1.5 um" }
                },
                "axon": {
                    "total_axon_length": { "value": "820.0 um" },
                    "max_branch_order": { "min": "2", "max": "9" }
                }
            }
        });
        let tree = normalize_tree(&raw).unwrap();
        let axon = &tree.cells["int_pyramidal"]["axon"];
        assert!(axon["total_axon_length"].as_predicted().is_some());
        assert!(axon["max_branch_order"].as_range().is_some());
        let (mean, std) = tree.cells["int_pyramidal"]["soma"]["mean_soma_diameter"]
            .as_observed()
            .unwrap();
        assert_eq!(mean.number, 12.0);
        assert_eq!(std.number, 1.5);
    }

    #[test]
    fn zero_std_is_floored_once() {
        let raw = json!({
            "cell": { "soma": { "mean_soma_diameter": { "mean": "10.0 um", "std": "0.0 um" } } }
        });
        let tree = normalize_tree(&raw).unwrap();
        let (_, std) = tree.cells["cell"]["soma"]["mean_soma_diameter"]
            .as_observed()
            .unwrap();
        assert_eq!(std.number, 1.0);
        assert_eq!(std.unit, Unit::Um);

        // Re-normalizing the serialized tree leaves the floor untouched.
        let round = serde_json::to_value(&tree).unwrap();
        let again = normalize_tree(&round).unwrap();
        assert_eq!(again, tree);
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = json!({
            "cell": {
                "axon": { "total_axon_length": { "value": "820.0 um" } },
                "soma": { "mean_soma_diameter": { "mean": "12.0 um", "std": "1.5 um" } }
            }
        });
        let once = normalize_tree(&raw).unwrap();
        let twice = normalize_tree(&serde_json::to_value(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_names_the_failing_path() {
        let raw = json!({
            "cell": { "soma": { "mean_soma_diameter": { "mean": "oops um", "std": "1.0 um" } } }
        });
        let err = normalize_tree(&raw).unwrap_err();
        assert!(err.to_string().contains("cell/soma/mean_soma_diameter"));
    }

    #[test]
    fn observation_shape_rejects_prediction_leaves() {
        let raw = json!({
            "cell": { "soma": { "mean_soma_diameter": { "value": "12.0 um" } } }
        });
        let tree = normalize_tree(&raw).unwrap();
        assert!(validate_observation(&tree).is_err());
        assert!(validate_prediction(&tree).is_ok());
    }

    #[test]
    fn nomenclature_rejects_unknown_part_and_mode() {
        let bad_part = json!({ "cell": { "dendrites": { "total_length": { "mean": "1 um", "std": "1 um" } } } });
        assert!(check_nomenclature(&bad_part).is_err());

        let bad_mode = json!({ "cell": { "axon": { "avg_section_length": { "mean": "1 um", "std": "1 um" } } } });
        assert!(check_nomenclature(&bad_mode).is_err());

        let ok = json!({ "cell": { "axon": {
            "total_section_length": { "mean": "1 um", "std": "1 um" },
            "neurite_X_extent": { "mean": "1 um", "std": "1 um" }
        } } });
        assert!(check_nomenclature(&ok).is_ok());
    }

    #[test]
    fn reconcile_strips_path_artifacts_and_regroups() {
        let raw = json!({
            "morphologies/cell_037.swc": {
                "axon": { "total_axon_length": 820.0 },
                "mean_soma_radii": 3.0,
                "total_number_of_neurite": 7.0
            }
        });
        let requested: BTreeSet<String> =
            ["total_number_of_neurites".to_string()].into_iter().collect();
        let out = reconcile_prediction(&raw, &requested);
        let cell = &out["cell_037"];
        assert!(cell.get("axon").is_some());
        // radius doubled exactly once and renamed
        assert_eq!(
            cell["soma"]["mean_soma_diameter"]["value"].as_str().unwrap(),
            "6 um"
        );
        // plural restored under the synthetic neuron part
        assert!(cell["neuron"].get("total_number_of_neurites").is_some());
    }

    #[test]
    fn reconcile_leaves_already_shaped_trees_untouched() {
        let shaped = json!({
            "cell_01": {
                "axon": { "total_axon_length": { "value": "14.0 um" } },
                "soma": { "mean_soma_diameter": { "value": "12.0 um" } },
                "neuron": { "total_number_of_neurites": { "value": "7" } }
            }
        });
        let out = reconcile_prediction(&shaped, &BTreeSet::new());
        assert_eq!(out, shaped);

        // And applying it twice to raw tool output changes nothing further.
        let raw = json!({
            "morphologies/cell_037.swc": {
                "axon": { "total_axon_length": 820.0 },
                "mean_soma_radii": 3.0
            }
        });
        let once = reconcile_prediction(&raw, &BTreeSet::new());
        let twice = reconcile_prediction(&once, &BTreeSet::new());
        assert_eq!(once, twice);
    }

    #[test]
    fn radius_rename_applies_only_with_the_doubling() {
        // An object-valued radius leaf carries no bare number to double, so
        // neither the rename nor the doubling applies.
        let raw = json!({ "cell": { "mean_soma_radius": { "value": "3.0 um" } } });
        let out = reconcile_prediction(&raw, &BTreeSet::new());
        assert_eq!(
            out["cell"]["soma"]["mean_soma_radius"]["value"]
                .as_str()
                .unwrap(),
            "3.0 um"
        );
    }
}
