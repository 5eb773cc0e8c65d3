//! Report generation for scored validation runs.
//!
//! Consumes the finished score tree and normalized trees; produces a JSON
//! summary, a plain-text score table and a markdown rendering. Figure
//! plotting stays outside the harness.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::ScoreTree;
use crate::harness::{TestState, ValidationTest};
use crate::normalize::FeatureValue;
use crate::score::ScoreKind;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),

    /// Reports can only be built from a scored test.
    #[error("test has no score yet (state {0:?})")]
    NotScored(TestState),
}

/// Summary of one scored run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub test_name: String,
    pub model_name: String,
    /// Hash of the normalized observation, stamping which reference the
    /// score was computed against.
    pub observation_hash: String,
    pub overall: f64,
    pub kind: ScoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    /// Per-cell aggregate scores for multi-cell shapes.
    pub cell_scores: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_tree: Option<ScoreTree>,
    pub generated_at: DateTime<Utc>,
}

/// Build a report from a scored test.
pub fn build_report(test: &ValidationTest) -> Result<TestReport, ReportError> {
    let outcome = test
        .outcome()
        .ok_or_else(|| ReportError::NotScored(test.state()))?;

    let cell_scores = outcome
        .score_tree
        .as_ref()
        .map(|tree| {
            tree.cells
                .iter()
                .map(|(cell, scores)| (cell.clone(), scores.mean_abs_zscore))
                .collect()
        })
        .unwrap_or_default();

    Ok(TestReport {
        test_name: test.spec().name.clone(),
        model_name: test.model_name().unwrap_or("<unbound>").to_string(),
        observation_hash: hash_tree(test.observation()),
        overall: outcome.overall,
        kind: outcome.kind,
        passed: outcome.passed,
        cell_scores,
        score_tree: outcome.score_tree.clone(),
        generated_at: Utc::now(),
    })
}

/// Render the classic score table: one row per scored feature.
pub fn render_text_table(test: &ValidationTest) -> Result<String, ReportError> {
    let outcome = test
        .outcome()
        .ok_or_else(|| ReportError::NotScored(test.state()))?;
    let reference: BTreeMap<&str, &BTreeMap<String, FeatureValue>> = test
        .observation()
        .reference_cell()
        .map(|(_, parts)| {
            parts
                .iter()
                .map(|(part, features)| (part.as_str(), features))
                .collect()
        })
        .unwrap_or_default();

    let rule_heavy = "=".repeat(78);
    let rule_light = "-".repeat(78);
    let rule_dots = ".".repeat(78);

    let mut out = String::new();
    out.push_str(&format!("{rule_heavy}\n"));
    out.push_str(&format!("Test Name: {}\n", test.spec().name));
    out.push_str(&format!(
        "Model Name: {}\n",
        test.model_name().unwrap_or("<unbound>")
    ));
    out.push_str(&format!("{rule_light}\n"));
    out.push_str("Parameter\tExpt. mean\tExpt. std\tModel value\tZ-score\n");
    out.push_str(&format!("{rule_dots}\n"));

    if let Some(prediction) = test.prediction() {
        for (cell, parts) in &prediction.cells {
            for (part, features) in parts {
                for (feature, value) in features {
                    let Some(predicted) = value.as_predicted() else {
                        continue;
                    };
                    let observed = reference.get(part.as_str()).and_then(|f| f.get(feature));
                    let (mean, std) = match observed.and_then(FeatureValue::as_observed) {
                        Some((m, s)) => (m.to_string(), s.to_string()),
                        None => match observed.and_then(FeatureValue::as_range) {
                            Some((min, max)) => (format!("min {min}"), format!("max {max}")),
                            None => continue,
                        },
                    };
                    let score = outcome
                        .score_tree
                        .as_ref()
                        .and_then(|tree| tree.cells.get(cell))
                        .and_then(|scores| scores.parts.get(part))
                        .and_then(|features| features.get(feature))
                        .map(|s| format!("{:.2}", s.score))
                        .unwrap_or_else(|| format!("{:.2}", outcome.overall));
                    out.push_str(&format!(
                        "{cell}/{part}/{feature}\t{mean}\t{std}\t{predicted}\t{score}\n"
                    ));
                }
            }
        }
    }

    out.push_str(&format!("{rule_light}\n"));
    match outcome.passed {
        Some(passed) => out.push_str(&format!(
            "Final Score: {}\n",
            if passed { "Pass" } else { "Fail" }
        )),
        None => out.push_str(&format!("Final Score: {:.2}\n", outcome.overall)),
    }
    out.push_str(&format!("{rule_heavy}\n"));
    Ok(out)
}

pub fn render_report_markdown(report: &TestReport) -> String {
    let mut out = String::new();
    out.push_str("# Validation Report\n\n");
    out.push_str(&format!("- Test: {}\n", report.test_name));
    out.push_str(&format!("- Model: {}\n", report.model_name));
    out.push_str(&format!(
        "- Observation hash: `{}`\n",
        report.observation_hash
    ));
    out.push_str(&format!("- Score kind: {:?}\n", report.kind));
    match report.passed {
        Some(passed) => out.push_str(&format!(
            "- Result: {}\n",
            if passed { "Pass" } else { "Fail" }
        )),
        None => out.push_str(&format!("- Overall score: {:.4}\n", report.overall)),
    }
    out.push_str(&format!("- Generated: {}\n", report.generated_at.to_rfc3339()));

    if !report.cell_scores.is_empty() {
        out.push_str("\n## Per-cell mean |Z-score|\n\n");
        for (cell, score) in &report.cell_scores {
            out.push_str(&format!("- {cell}: {score:.4}\n"));
        }
    }
    out
}

/// Write the run's artifacts into `dir`: JSON score summary, JSON prediction
/// summary (when available) and the text table. Returns the written paths so
/// the caller can bind them to the test.
pub fn write_report_files(
    test: &ValidationTest,
    report: &TestReport,
    dir: &Path,
) -> Result<Vec<PathBuf>, ReportError> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let scores_path = dir.join("scores_summary.json");
    let body =
        serde_json::to_string_pretty(report).map_err(|e| ReportError::Serde(e.to_string()))?;
    std::fs::write(&scores_path, body)?;
    written.push(scores_path);

    if let Some(prediction) = test.prediction_summary() {
        let pred_path = dir.join("prediction_summary.json");
        let body = serde_json::to_string_pretty(prediction)
            .map_err(|e| ReportError::Serde(e.to_string()))?;
        std::fs::write(&pred_path, body)?;
        written.push(pred_path);
    }

    let table_path = dir.join("score_summary.txt");
    std::fs::write(&table_path, render_text_table(test)?)?;
    written.push(table_path);

    tracing::debug!(dir = %dir.display(), files = written.len(), "report artifacts written");
    Ok(written)
}

fn hash_tree<T: Serialize>(tree: &T) -> String {
    let bytes = serde_json::to_vec(tree).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{CapabilityKind, ScorePolicy, TestShape, TestSpec};
    use crate::model::StaticModel;
    use serde_json::json;

    fn scored_test() -> ValidationTest {
        let spec = TestSpec::new(
            "Cell Density Test",
            TestShape::SingleQuantity,
            ScorePolicy::MeanAbsZScore,
            CapabilityKind::DensityInfo,
        );
        let observation = json!({ "density": { "mean": "120.0", "std": "10.0" } });
        let mut test = ValidationTest::new(spec, &observation).unwrap();
        let model = StaticModel::new("model-a", json!({ "density": { "value": "140.0" } }));
        test.generate_prediction(&model).unwrap();
        test.compute_score().unwrap();
        test
    }

    #[test]
    fn report_requires_a_scored_test() {
        let spec = TestSpec::new(
            "Cell Density Test",
            TestShape::SingleQuantity,
            ScorePolicy::MeanAbsZScore,
            CapabilityKind::DensityInfo,
        );
        let observation = json!({ "density": { "mean": "120.0", "std": "10.0" } });
        let test = ValidationTest::new(spec, &observation).unwrap();
        assert!(matches!(
            build_report(&test).unwrap_err(),
            ReportError::NotScored(_)
        ));
    }

    #[test]
    fn text_table_contains_row_and_final_score() {
        let test = scored_test();
        let table = render_text_table(&test).unwrap();
        assert!(table.contains("Test Name: Cell Density Test"));
        assert!(table.contains("model-a/neuron/density"));
        assert!(table.contains("Final Score: 2.00"));
    }

    #[test]
    fn report_files_are_written_and_listed() {
        let test = scored_test();
        let report = build_report(&test).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let files = write_report_files(&test, &report, dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|p| p.exists()));

        let markdown = render_report_markdown(&report);
        assert!(markdown.contains("Overall score: 2.0000"));
    }
}
