//! Test orchestration: the validate → predict → score → bind life cycle.
//!
//! One [`ValidationTest`] owns one run end to end. The historical family of
//! near-duplicate test classes collapses into a single pipeline parameterized
//! by a [`TestShape`] (how the observation tree is shaped) and a
//! [`ScorePolicy`] (how the comparison is scored). Transitions are strictly
//! sequential per instance; out-of-order calls fail with a state error rather
//! than recompute.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::aggregate::{self, AggregateError, ScoreTree};
use crate::capability::{Model, ModelError};
use crate::normalize::{
    check_nomenclature, normalize_tree, reconcile_prediction, validate_observation,
    validate_prediction, FeatureTree, FeatureValue, NormalizeError,
};
use crate::score::{self, ScoreError, ScoreKind};
use crate::tool::StatsConfig;

/// Synthetic cell key used when lifting shallow observation trees.
const REFERENCE_CELL: &str = "reference";

/// Synthetic part key used when lifting single-quantity trees.
const WHOLE_CELL_PART: &str = "neuron";

// =============================================================================
// Test specification
// =============================================================================

/// How the raw observation (and prediction) trees are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestShape {
    /// One scalar statistic (cell density, soma diameter).
    SingleQuantity,
    /// One feature per layer; layer counts must match exactly.
    PerLayer,
    /// One cell, features grouped by cell part.
    PerCellPart,
    /// Many cells scored against one reference entry.
    PopulationAveraged,
}

/// How a prediction is scored against the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Z-scores combined as a mean of absolute values.
    MeanAbsZScore,
    /// Boolean min/max acceptance (single-quantity only).
    RangeCheck,
    /// Signed distance to the nearer bound (single-quantity only).
    RangeScore,
}

/// Which model accessor the test binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    LayerInfo,
    DensityInfo,
    MorphFeatureInfo,
    SomaDiameter,
    Ca1PathDistance,
}

impl CapabilityKind {
    pub fn accessor_name(self) -> &'static str {
        match self {
            CapabilityKind::LayerInfo => "get_layer_info",
            CapabilityKind::DensityInfo => "get_density_info",
            CapabilityKind::MorphFeatureInfo => "get_morph_feature_info",
            CapabilityKind::SomaDiameter => "get_soma_diameter_info",
            CapabilityKind::Ca1PathDistance => "get_ca1_layers_neurite_path_distance_info",
        }
    }
}

/// Static description of one validation test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    pub shape: TestShape,
    pub policy: ScorePolicy,
    pub capability: CapabilityKind,
}

impl TestSpec {
    pub fn new(
        name: impl Into<String>,
        shape: TestShape,
        policy: ScorePolicy,
        capability: CapabilityKind,
    ) -> Self {
        Self {
            name: name.into(),
            shape,
            policy,
            capability,
        }
    }
}

// =============================================================================
// Life cycle
// =============================================================================

/// Sequential states of one test instance. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    Constructed,
    ObservationValidated,
    PredictionGenerated,
    Scored,
    Bound,
}

/// Result of a scored run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// The single scalar discrepancy score.
    pub overall: f64,
    pub kind: ScoreKind,
    /// Pass/fail for the range-check policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    /// Full per-level breakdown for multi-feature shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_tree: Option<ScoreTree>,
}

/// Errors from the orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tool(#[from] crate::tool::ToolError),

    /// Life-cycle call out of order.
    #[error("invalid life cycle transition: {operation} requires {expected:?}, test is {actual:?}")]
    State {
        operation: &'static str,
        expected: TestState,
        actual: TestState,
    },

    /// Shape/policy combination the pipeline cannot score.
    #[error("unsupported test configuration: {0}")]
    Config(String),

    /// Per-layer tests require the same layer set on both sides.
    #[error("layer count mismatch: observation has {observed}, prediction has {predicted}")]
    LayerCountMismatch { observed: usize, predicted: usize },
}

/// One validation run: observation in, scalar score and breakdown out.
#[derive(Debug)]
pub struct ValidationTest {
    spec: TestSpec,
    state: TestState,
    observation: FeatureTree,
    /// Requested feature names, for reconciling tool-side renames.
    requested: BTreeSet<String>,
    model_name: Option<String>,
    prediction: Option<FeatureTree>,
    /// Reconciled prediction before quantity parsing, kept for reports.
    prediction_txt: Option<Value>,
    outcome: Option<TestOutcome>,
    artifacts: Vec<PathBuf>,
}

impl ValidationTest {
    /// Normalize and validate the observation at construction time. A
    /// structural failure here aborts before any model is touched.
    pub fn new(spec: TestSpec, raw_observation: &Value) -> Result<Self, HarnessError> {
        if matches!(spec.policy, ScorePolicy::RangeCheck | ScorePolicy::RangeScore)
            && spec.shape != TestShape::SingleQuantity
        {
            return Err(HarnessError::Config(
                "range policies apply to single-quantity tests only".to_string(),
            ));
        }

        if spec.capability == CapabilityKind::MorphFeatureInfo {
            check_nomenclature(raw_observation)?;
        }
        let requested = requested_features(raw_observation);

        let lifted = lift_raw(spec.shape, raw_observation, REFERENCE_CELL);
        let observation = normalize_tree(&lifted)?;
        validate_observation(&observation)?;

        tracing::debug!(test = %spec.name, leaves = observation.leaf_count(), "observation validated");
        Ok(Self {
            spec,
            state: TestState::ObservationValidated,
            observation,
            requested,
            model_name: None,
            prediction: None,
            prediction_txt: None,
            outcome: None,
            artifacts: Vec::new(),
        })
    }

    pub fn spec(&self) -> &TestSpec {
        &self.spec
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    pub fn observation(&self) -> &FeatureTree {
        &self.observation
    }

    pub fn prediction(&self) -> Option<&FeatureTree> {
        self.prediction.as_ref()
    }

    /// The reconciled (pre-normalization) prediction, for report export.
    pub fn prediction_summary(&self) -> Option<&Value> {
        self.prediction_txt.as_ref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn outcome(&self) -> Option<&TestOutcome> {
        self.outcome.as_ref()
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Bind the model's accessor, fetch the raw tree, reconcile and
    /// normalize it.
    pub fn generate_prediction(&mut self, model: &dyn Model) -> Result<(), HarnessError> {
        self.require_state("generate_prediction", TestState::ObservationValidated)?;

        let raw = self.fetch_raw(model)?;
        let reconciled = if self.spec.capability == CapabilityKind::MorphFeatureInfo {
            reconcile_prediction(&raw, &self.requested)
        } else {
            raw
        };
        self.prediction_txt = Some(reconciled.clone());

        let lifted = lift_raw(self.spec.shape, &reconciled, model.name());
        let prediction = normalize_tree(&lifted)?;
        validate_prediction(&prediction)?;

        tracing::debug!(test = %self.spec.name, model = model.name(), "prediction generated");
        self.model_name = Some(model.name().to_string());
        self.prediction = Some(prediction);
        self.state = TestState::PredictionGenerated;
        Ok(())
    }

    /// Score the prediction against the observation.
    pub fn compute_score(&mut self) -> Result<&TestOutcome, HarnessError> {
        self.require_state("compute_score", TestState::PredictionGenerated)?;
        let prediction = self
            .prediction
            .as_ref()
            .ok_or_else(|| HarnessError::Config("prediction missing after generation".to_string()))?;

        let outcome = match self.spec.shape {
            TestShape::SingleQuantity => score_single_quantity(
                self.spec.policy,
                &self.observation,
                prediction,
            )?,
            TestShape::PerLayer => {
                check_layer_counts(&self.observation, prediction)?;
                score_aggregate(&self.observation, prediction)?
            }
            TestShape::PerCellPart | TestShape::PopulationAveraged => {
                score_aggregate(&self.observation, prediction)?
            }
        };

        tracing::info!(test = %self.spec.name, overall = outcome.overall, "test scored");
        self.state = TestState::Scored;
        Ok(&*self.outcome.insert(outcome))
    }

    /// Attach report artifact paths. Purely additive; the score itself is
    /// never re-mutated. May be called repeatedly once scored.
    pub fn bind_artifacts(&mut self, paths: Vec<PathBuf>) -> Result<(), HarnessError> {
        match self.state {
            TestState::Scored | TestState::Bound => {
                self.artifacts.extend(paths);
                self.state = TestState::Bound;
                Ok(())
            }
            actual => Err(HarnessError::State {
                operation: "bind_artifacts",
                expected: TestState::Scored,
                actual,
            }),
        }
    }

    fn require_state(
        &self,
        operation: &'static str,
        expected: TestState,
    ) -> Result<(), HarnessError> {
        if self.state != expected {
            return Err(HarnessError::State {
                operation,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn fetch_raw(&self, model: &dyn Model) -> Result<Value, HarnessError> {
        let mismatch = || {
            ModelError::capability_mismatch(model.name(), self.spec.capability.accessor_name())
        };
        let raw = match self.spec.capability {
            CapabilityKind::LayerInfo => model.as_layer_info().ok_or_else(mismatch)?.get_layer_info(),
            CapabilityKind::DensityInfo => model
                .as_density_info()
                .ok_or_else(mismatch)?
                .get_density_info(),
            CapabilityKind::MorphFeatureInfo => model
                .as_morph_feature_info()
                .ok_or_else(mismatch)?
                .get_morph_feature_info(),
            CapabilityKind::SomaDiameter => model
                .as_morphology()
                .ok_or_else(mismatch)?
                .get_soma_diameter_info(),
            CapabilityKind::Ca1PathDistance => model
                .as_ca1_path_distance_info()
                .ok_or_else(mismatch)?
                .get_ca1_layers_neurite_path_distance_info(),
        }?;
        Ok(raw)
    }
}

// =============================================================================
// Shape handling
// =============================================================================

/// Lift a shallow raw tree to the canonical three levels. Single-quantity
/// trees gain a synthetic cell and whole-cell part; per-layer trees gain a
/// synthetic cell over their layer keys. Full trees pass through.
fn lift_raw(shape: TestShape, raw: &Value, cell_key: &str) -> Value {
    match shape {
        TestShape::SingleQuantity => serde_json::json!({ cell_key: { WHOLE_CELL_PART: raw } }),
        TestShape::PerLayer => serde_json::json!({ cell_key: raw }),
        TestShape::PerCellPart | TestShape::PopulationAveraged => raw.clone(),
    }
}

fn check_layer_counts(
    observation: &FeatureTree,
    prediction: &FeatureTree,
) -> Result<(), HarnessError> {
    let observed = observation
        .reference_cell()
        .map(|(_, parts)| parts.len())
        .unwrap_or(0);
    for parts in prediction.cells.values() {
        if parts.len() != observed {
            return Err(HarnessError::LayerCountMismatch {
                observed,
                predicted: parts.len(),
            });
        }
    }
    Ok(())
}

fn score_aggregate(
    observation: &FeatureTree,
    prediction: &FeatureTree,
) -> Result<TestOutcome, HarnessError> {
    let (tree, overall) = aggregate::aggregate(observation, prediction)?;
    Ok(TestOutcome {
        overall,
        kind: ScoreKind::CombinedZScore,
        passed: None,
        score_tree: Some(tree),
    })
}

fn score_single_quantity(
    policy: ScorePolicy,
    observation: &FeatureTree,
    prediction: &FeatureTree,
) -> Result<TestOutcome, HarnessError> {
    let (obs_path, observed) = single_leaf(observation)
        .ok_or_else(|| HarnessError::Config("single-quantity observation must have exactly one feature".to_string()))?;
    let (_, predicted) = single_leaf(prediction)
        .ok_or_else(|| HarnessError::Config("single-quantity prediction must have exactly one feature".to_string()))?;

    match policy {
        ScorePolicy::MeanAbsZScore => {
            let z = aggregate::score_single(&obs_path, observed, predicted)?;
            Ok(TestOutcome {
                overall: z,
                kind: ScoreKind::ZScore,
                passed: None,
                score_tree: None,
            })
        }
        ScorePolicy::RangeCheck => {
            let (min, max) = range_bounds(&obs_path, observed)?;
            let value = predicted_value(&obs_path, predicted)?;
            let passed = score::range_check(min, max, value)?;
            Ok(TestOutcome {
                overall: if passed { 1.0 } else { 0.0 },
                kind: ScoreKind::RangeCheck,
                passed: Some(passed),
                score_tree: None,
            })
        }
        ScorePolicy::RangeScore => {
            let (min, max) = range_bounds(&obs_path, observed)?;
            let value = predicted_value(&obs_path, predicted)?;
            let distance = score::range_score(min, max, value)?;
            Ok(TestOutcome {
                overall: distance,
                kind: ScoreKind::RangeScore,
                passed: None,
                score_tree: None,
            })
        }
    }
}

/// The single leaf of a degenerate tree, with its path for error reporting.
fn single_leaf(tree: &FeatureTree) -> Option<(String, &FeatureValue)> {
    let mut leaves = tree.cells.iter().flat_map(|(cell, parts)| {
        parts.iter().flat_map(move |(part, features)| {
            features
                .iter()
                .map(move |(feature, value)| (format!("{cell}/{part}/{feature}"), value))
        })
    });
    let first = leaves.next()?;
    if leaves.next().is_some() {
        return None;
    }
    Some(first)
}

fn range_bounds(
    path: &str,
    observed: &FeatureValue,
) -> Result<(crate::quantity::Quantity, crate::quantity::Quantity), HarnessError> {
    observed.as_range().ok_or_else(|| {
        HarnessError::Aggregate(AggregateError::ShapeMismatch {
            path: path.to_string(),
            expected: "{min, max}",
        })
    })
}

fn predicted_value(
    path: &str,
    predicted: &FeatureValue,
) -> Result<crate::quantity::Quantity, HarnessError> {
    predicted.as_predicted().ok_or_else(|| {
        HarnessError::Aggregate(AggregateError::ShapeMismatch {
            path: path.to_string(),
            expected: "{value}",
        })
    })
}

/// All feature names in a raw observation, for plural restoration.
fn requested_features(raw: &Value) -> BTreeSet<String> {
    match StatsConfig::from_observation(raw) {
        Ok(config) => config.requested,
        Err(_) => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaticModel;
    use serde_json::json;

    fn density_spec() -> TestSpec {
        TestSpec::new(
            "Cell Density Test",
            TestShape::SingleQuantity,
            ScorePolicy::MeanAbsZScore,
            CapabilityKind::DensityInfo,
        )
    }

    #[test]
    fn single_quantity_zscore_lifecycle() {
        let observation = json!({ "density": { "mean": "120.0", "std": "10.0" } });
        let mut test = ValidationTest::new(density_spec(), &observation).unwrap();
        assert_eq!(test.state(), TestState::ObservationValidated);

        let model = StaticModel::new("model-a", json!({ "density": { "value": "140.0" } }));
        test.generate_prediction(&model).unwrap();
        assert_eq!(test.state(), TestState::PredictionGenerated);

        let outcome = test.compute_score().unwrap();
        assert_eq!(outcome.overall, 2.0);
        assert_eq!(outcome.kind, ScoreKind::ZScore);

        test.bind_artifacts(vec![PathBuf::from("score_summary.txt")])
            .unwrap();
        assert_eq!(test.state(), TestState::Bound);
        assert_eq!(test.artifacts().len(), 1);
    }

    #[test]
    fn out_of_order_calls_are_state_errors() {
        let observation = json!({ "density": { "mean": "120.0", "std": "10.0" } });
        let mut test = ValidationTest::new(density_spec(), &observation).unwrap();

        assert!(matches!(
            test.compute_score().unwrap_err(),
            HarnessError::State { .. }
        ));
        assert!(matches!(
            test.bind_artifacts(vec![]).unwrap_err(),
            HarnessError::State { .. }
        ));
    }

    #[test]
    fn missing_capability_fails_at_bind_time() {
        struct NoCapModel;
        impl Model for NoCapModel {
            fn name(&self) -> &str {
                "no-cap"
            }
        }

        let observation = json!({ "density": { "mean": "120.0", "std": "10.0" } });
        let mut test = ValidationTest::new(density_spec(), &observation).unwrap();
        let err = test.generate_prediction(&NoCapModel).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Model(ModelError::CapabilityMismatch { .. })
        ));
    }

    #[test]
    fn range_check_policy_reports_pass_fail() {
        let spec = TestSpec::new(
            "Soma Diameter Range",
            TestShape::SingleQuantity,
            ScorePolicy::RangeCheck,
            CapabilityKind::SomaDiameter,
        );
        let observation = json!({ "diameter": { "min": "5.0 um", "max": "10.0 um" } });
        let mut test = ValidationTest::new(spec, &observation).unwrap();
        let model = StaticModel::new("m", json!({ "diameter": { "value": "10.0 um" } }));
        test.generate_prediction(&model).unwrap();
        let outcome = test.compute_score().unwrap();
        assert_eq!(outcome.passed, Some(true));
        assert_eq!(outcome.overall, 1.0);
    }

    #[test]
    fn per_layer_requires_matching_layer_counts() {
        let spec = TestSpec::new(
            "CA1 Path Distance",
            TestShape::PerLayer,
            ScorePolicy::MeanAbsZScore,
            CapabilityKind::Ca1PathDistance,
        );
        let observation = json!({
            "SLM": { "PathDistance": { "mean": "110.0 um", "std": "10.0 um" } },
            "SR": { "PathDistance": { "mean": "300.0 um", "std": "20.0 um" } }
        });
        let mut test = ValidationTest::new(spec, &observation).unwrap();
        let model = StaticModel::new(
            "m",
            json!({ "SLM": { "PathDistance": { "value": "120.0 um" } } }),
        );
        test.generate_prediction(&model).unwrap();
        let err = test.compute_score().unwrap_err();
        assert!(matches!(err, HarnessError::LayerCountMismatch { .. }));
    }

    #[test]
    fn range_policy_rejects_multi_feature_shape() {
        let spec = TestSpec::new(
            "bad",
            TestShape::PerCellPart,
            ScorePolicy::RangeCheck,
            CapabilityKind::MorphFeatureInfo,
        );
        let err = ValidationTest::new(spec, &json!({})).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
