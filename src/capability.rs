//! Model capability interface.
//!
//! Each test shape requires one accessor returning a raw string-keyed tree.
//! Models advertise what they provide through the optional downcasts on
//! [`Model`]; a harness binding a test to a model that lacks the required
//! accessor fails with a capability mismatch before any work is done.

use serde_json::Value;
use thiserror::Error;

/// Errors a model may raise while producing a raw tree.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model cannot satisfy the accessor the test requires.
    #[error("model {model:?} does not provide {capability}")]
    CapabilityMismatch { model: String, capability: &'static str },

    /// The external statistics tool failed (spawn, exit status, output).
    #[error(transparent)]
    Tool(#[from] crate::tool::ToolError),

    /// The model's backing morphology path is missing or invalid.
    #[error("invalid morphology path {path:?}")]
    InvalidMorphologyPath { path: std::path::PathBuf },
}

impl ModelError {
    pub fn capability_mismatch(model: &str, capability: &'static str) -> Self {
        Self::CapabilityMismatch {
            model: model.to_string(),
            capability,
        }
    }
}

/// Layer names and heights of a circuit model.
pub trait ProvidesLayerInfo {
    /// Returns `{ "<layer>": { "height": { "value": "X um" } }, ... }`.
    fn get_layer_info(&self) -> Result<Value, ModelError>;
}

/// Cell density within a single layer.
pub trait ProvidesDensityInfo {
    /// Returns `{ "density": { "value": "X" } }` (dimensionless rate).
    fn get_density_info(&self) -> Result<Value, ModelError>;
}

/// Per-cell morphological feature measurements.
pub trait ProvidesMorphFeatureInfo {
    /// Returns `{ "<cell>": { "<part-or-feature>": ... }, ... }`, the raw
    /// statistics-tool output prior to reconciliation.
    fn get_morph_feature_info(&self) -> Result<Value, ModelError>;
}

/// Soma diameter of a reconstructed cell.
pub trait HandlesMorphology {
    /// Returns `{ "diameter": { "value": "X um" } }`.
    fn get_soma_diameter_info(&self) -> Result<Value, ModelError>;
}

/// Neurite path distances across the four CA1 layers (SLM, SR, SP, SO).
pub trait ProvidesCA1NeuritePathDistanceInfo {
    /// Returns `{ "<layer>": { "PathDistance": { "value": "X um" } }, ... }`.
    fn get_ca1_layers_neurite_path_distance_info(&self) -> Result<Value, ModelError>;
}

/// A model under test. Accessor downcasts default to `None`; implementations
/// override the ones they support.
pub trait Model {
    fn name(&self) -> &str;

    fn as_layer_info(&self) -> Option<&dyn ProvidesLayerInfo> {
        None
    }

    fn as_density_info(&self) -> Option<&dyn ProvidesDensityInfo> {
        None
    }

    fn as_morph_feature_info(&self) -> Option<&dyn ProvidesMorphFeatureInfo> {
        None
    }

    fn as_morphology(&self) -> Option<&dyn HandlesMorphology> {
        None
    }

    fn as_ca1_path_distance_info(&self) -> Option<&dyn ProvidesCA1NeuritePathDistanceInfo> {
        None
    }
}
