//! Model implementations backed by morphology files.
//!
//! [`MorphologyModel`] wraps a reconstructed morphology file or directory and
//! satisfies the morphology capabilities by invoking the external statistics
//! tool. [`StaticModel`] wraps a pre-computed raw tree and satisfies every
//! capability from it; the CLI uses it to score prediction files directly,
//! and tests use it in place of a live tool.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::capability::{
    HandlesMorphology, Model, ModelError, ProvidesCA1NeuritePathDistanceInfo, ProvidesDensityInfo,
    ProvidesLayerInfo, ProvidesMorphFeatureInfo,
};
use crate::quantity::Unit;
use crate::tool::{run_morph_stats, StatsConfig};

/// A model whose predictions come from running the statistics tool against a
/// morphology file (one cell) or directory (a population).
pub struct MorphologyModel {
    name: String,
    morph_path: PathBuf,
    tool_binary: PathBuf,
    output_dir: PathBuf,
    stats_config: StatsConfig,
}

impl MorphologyModel {
    /// `stats_config` is derived from the observation under test
    /// ([`StatsConfig::from_observation`]); the morphology path must exist.
    pub fn new(
        name: impl Into<String>,
        morph_path: impl Into<PathBuf>,
        tool_binary: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        stats_config: StatsConfig,
    ) -> Result<Self, ModelError> {
        let morph_path = morph_path.into();
        if !morph_path.exists() {
            return Err(ModelError::InvalidMorphologyPath { path: morph_path });
        }
        Ok(Self {
            name: name.into(),
            morph_path,
            tool_binary: tool_binary.into(),
            output_dir: output_dir.into(),
            stats_config,
        })
    }

    pub fn morph_path(&self) -> &Path {
        &self.morph_path
    }

    pub fn stats_config(&self) -> &StatsConfig {
        &self.stats_config
    }

    fn run_tool(&self, config: &StatsConfig, tag: &str) -> Result<Value, ModelError> {
        std::fs::create_dir_all(&self.output_dir).map_err(crate::tool::ToolError::Io)?;
        let config_path = self.output_dir.join(format!("{tag}_config.json"));
        let output_path = self.output_dir.join(format!("{tag}_output.json"));
        config.write(&config_path)?;
        let result = run_morph_stats(&self.tool_binary, &config_path, &self.morph_path, &output_path)?;
        Ok(result)
    }
}

impl Model for MorphologyModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_morph_feature_info(&self) -> Option<&dyn ProvidesMorphFeatureInfo> {
        Some(self)
    }

    fn as_morphology(&self) -> Option<&dyn HandlesMorphology> {
        Some(self)
    }
}

impl ProvidesMorphFeatureInfo for MorphologyModel {
    fn get_morph_feature_info(&self) -> Result<Value, ModelError> {
        self.run_tool(&self.stats_config, "morph_stats")
    }
}

impl HandlesMorphology for MorphologyModel {
    fn get_soma_diameter_info(&self) -> Result<Value, ModelError> {
        let mut config = StatsConfig::default();
        config
            .neuron
            .insert("soma_radius".to_string(), vec!["mean".to_string()]);
        let raw = self.run_tool(&config, "soma_diameter")?;

        // One cell entry with a mean soma radius; report it as a diameter.
        let radius = raw
            .as_object()
            .and_then(|cells| cells.values().next())
            .and_then(|cell| cell.get("mean_soma_radius"))
            .and_then(Value::as_f64)
            .ok_or_else(|| crate::tool::ToolError::MalformedOutput {
                path: self.output_dir.join("soma_diameter_output.json"),
                reason: "missing mean_soma_radius".to_string(),
            })?;
        let diameter = crate::quantity::Quantity::new(radius * 2.0, Unit::Um);
        Ok(serde_json::json!({ "diameter": { "value": diameter.to_string() } }))
    }
}

/// A model answering every capability from one pre-computed raw tree.
pub struct StaticModel {
    name: String,
    tree: Value,
}

impl StaticModel {
    pub fn new(name: impl Into<String>, tree: Value) -> Self {
        Self {
            name: name.into(),
            tree,
        }
    }
}

impl Model for StaticModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_layer_info(&self) -> Option<&dyn ProvidesLayerInfo> {
        Some(self)
    }

    fn as_density_info(&self) -> Option<&dyn ProvidesDensityInfo> {
        Some(self)
    }

    fn as_morph_feature_info(&self) -> Option<&dyn ProvidesMorphFeatureInfo> {
        Some(self)
    }

    fn as_morphology(&self) -> Option<&dyn HandlesMorphology> {
        Some(self)
    }

    fn as_ca1_path_distance_info(&self) -> Option<&dyn ProvidesCA1NeuritePathDistanceInfo> {
        Some(self)
    }
}

impl ProvidesLayerInfo for StaticModel {
    fn get_layer_info(&self) -> Result<Value, ModelError> {
        Ok(self.tree.clone())
    }
}

impl ProvidesDensityInfo for StaticModel {
    fn get_density_info(&self) -> Result<Value, ModelError> {
        Ok(self.tree.clone())
    }
}

impl ProvidesMorphFeatureInfo for StaticModel {
    fn get_morph_feature_info(&self) -> Result<Value, ModelError> {
        Ok(self.tree.clone())
    }
}

impl HandlesMorphology for StaticModel {
    fn get_soma_diameter_info(&self) -> Result<Value, ModelError> {
        Ok(self.tree.clone())
    }
}

impl ProvidesCA1NeuritePathDistanceInfo for StaticModel {
    fn get_ca1_layers_neurite_path_distance_info(&self) -> Result<Value, ModelError> {
        Ok(self.tree.clone())
    }
}
