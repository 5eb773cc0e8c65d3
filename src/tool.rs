//! Boundary to the external morphology-statistics command.
//!
//! The harness derives a JSON configuration from the raw observation (which
//! features, which statistical modes, which neurite types), shells out to the
//! statistics tool against a morphology file or directory, and reads back the
//! JSON result at a path it chose. The invocation is blocking with no timeout
//! and no retry: a failed run may leave a partial output file behind, and
//! morphological statistics are not safely recomputable against one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from configuring or invoking the statistics tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-zero exit status; stderr is captured for the error report.
    #[error("statistics tool exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The tool exited cleanly but its output file is missing or unreadable.
    #[error("statistics tool produced no output at {path:?}")]
    MissingOutput { path: PathBuf },

    /// The output file exists but does not parse as JSON.
    #[error("malformed tool output at {path:?}: {reason}")]
    MalformedOutput { path: PathBuf, reason: String },

    /// The observation requested nothing the tool can compute.
    #[error("observation requests no computable features")]
    EmptyConfig,
}

/// Configuration request for the statistics tool, derived from the raw
/// observation file: per-feature statistical modes for neurites and for the
/// whole cell, plus the neurite types to analyze.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Neurite types to analyze, upper-cased part names.
    pub neurite_type: Vec<String>,
    /// Neurite feature name -> statistical modes requested.
    pub neurite: BTreeMap<String, Vec<String>>,
    /// Whole-cell feature name -> statistical modes requested.
    pub neuron: BTreeMap<String, Vec<String>>,

    /// Features computed outside the tool, keyed by cell part. Not part of
    /// the tool config file proper; kept for the caller.
    #[serde(skip)]
    pub extra: BTreeMap<String, Vec<String>>,

    /// Full requested feature names, for restoring tool-stripped plurals.
    #[serde(skip)]
    pub requested: BTreeSet<String>,
}

impl StatsConfig {
    /// Derive the tool configuration from a raw (pre-normalization)
    /// observation tree. Feature names are `<stat_mode>_<feature>`; names
    /// from the extra-neurite set are collected separately since the tool
    /// does not compute them.
    pub fn from_observation(raw: &Value) -> Result<StatsConfig, ToolError> {
        let mut config = StatsConfig::default();
        let Some(cells) = raw.as_object() else {
            return Err(ToolError::EmptyConfig);
        };

        for parts in cells.values() {
            let Some(parts) = parts.as_object() else {
                continue;
            };
            for (part, features) in parts {
                let Some(features) = features.as_object() else {
                    continue;
                };
                if part != "neuron" {
                    let upper = part.to_uppercase();
                    if !config.neurite_type.contains(&upper) {
                        config.neurite_type.push(upper);
                    }
                }
                for name in features.keys() {
                    config.requested.insert(name.clone());
                    if crate::normalize::EXTRA_NEURITE_FEATURES.contains(&name.as_str()) {
                        config
                            .extra
                            .entry(part.clone())
                            .or_default()
                            .push(name.clone());
                        continue;
                    }
                    let (mode, feature) = match name.split_once('_') {
                        Some(split) => split,
                        None => continue,
                    };
                    let table = if part == "neuron" {
                        &mut config.neuron
                    } else {
                        &mut config.neurite
                    };
                    let modes = table.entry(feature.to_string()).or_default();
                    if !modes.contains(&mode.to_string()) {
                        modes.push(mode.to_string());
                    }
                }
            }
        }

        if config.neurite.is_empty() && config.neuron.is_empty() && config.extra.is_empty() {
            return Err(ToolError::EmptyConfig);
        }
        Ok(config)
    }

    /// Write the tool configuration file as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<(), ToolError> {
        let body = serde_json::to_string_pretty(self).map_err(|e| ToolError::MalformedOutput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// Run the statistics tool and read back its JSON output.
///
/// Blocking, no timeout, no retry; any failure is fatal to the run.
pub fn run_morph_stats(
    tool_binary: &Path,
    config_path: &Path,
    morph_path: &Path,
    output_path: &Path,
) -> Result<Value, ToolError> {
    tracing::debug!(tool = %tool_binary.display(), morph = %morph_path.display(), "invoking statistics tool");
    let output = Command::new(tool_binary)
        .arg("--config")
        .arg(config_path)
        .arg("--output")
        .arg(output_path)
        .arg(morph_path)
        .output()?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let body = std::fs::read_to_string(output_path).map_err(|_| ToolError::MissingOutput {
        path: output_path.to_path_buf(),
    })?;
    serde_json::from_str(&body).map_err(|e| ToolError::MalformedOutput {
        path: output_path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_collects_modes_per_feature() {
        let raw = json!({
            "int_pyramidal": {
                "axon": {
                    "total_section_length": { "mean": "1 um", "std": "1 um" },
                    "mean_section_length": { "mean": "1 um", "std": "1 um" },
                    "neurite_X_extent": { "mean": "1 um", "std": "1 um" }
                },
                "neuron": {
                    "total_number_of_neurites": { "mean": "7", "std": "1" }
                }
            }
        });
        let config = StatsConfig::from_observation(&raw).unwrap();
        assert_eq!(config.neurite_type, vec!["AXON".to_string()]);
        let modes = &config.neurite["section_length"];
        assert!(modes.contains(&"total".to_string()) && modes.contains(&"mean".to_string()));
        assert_eq!(config.neuron["number_of_neurites"], vec!["total"]);
        assert_eq!(config.extra["axon"], vec!["neurite_X_extent"]);
        assert!(config.requested.contains("total_number_of_neurites"));
    }

    #[test]
    fn empty_observation_is_rejected() {
        assert!(matches!(
            StatsConfig::from_observation(&json!({})),
            Err(ToolError::EmptyConfig)
        ));
    }

    #[test]
    fn missing_tool_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_morph_stats(
            Path::new("/nonexistent/morph-stats"),
            &dir.path().join("config.json"),
            dir.path().join("cell.swc").as_path(),
            &dir.path().join("out.json"),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}
