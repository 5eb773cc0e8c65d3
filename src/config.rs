//! Run configuration.
//!
//! An explicit value threaded through calls rather than shared state; output
//! directories are namespaced by test, model and timestamp so concurrent
//! runs never collide on the filesystem.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root directory for run artifacts (reports, tool config/output files).
    pub base_directory: PathBuf,
    /// Statistics tool binary to invoke for morphology features.
    pub tool_binary: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("./validation_output"),
            tool_binary: PathBuf::from("morph-stats"),
        }
    }
}

impl RunConfig {
    pub fn new(base_directory: impl Into<PathBuf>, tool_binary: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            tool_binary: tool_binary.into(),
        }
    }

    /// `base/<test>/<model>/<UTC timestamp>` for one run's artifacts.
    pub fn output_dir(&self, test_name: &str, model_name: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        self.base_directory
            .join(slug(test_name))
            .join(slug(model_name))
            .join(stamp)
    }
}

/// Lower-cased, filesystem-safe rendition of a display name.
fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Convenience for joining a run directory that may not exist yet.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_is_namespaced_by_test_and_model() {
        let config = RunConfig::default();
        let dir = config.output_dir("Soma Diameter Test", "cell-v2");
        let rendered = dir.to_string_lossy().into_owned();
        assert!(rendered.contains("soma_diameter_test"));
        assert!(rendered.contains("cell_v2"));
    }
}
