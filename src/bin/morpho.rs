#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use morpho_harness::config::{ensure_dir, RunConfig};
use morpho_harness::model::{MorphologyModel, StaticModel};
use morpho_harness::normalize::normalize_tree;
use morpho_harness::report::{
    build_report, render_report_markdown, render_text_table, write_report_files, TestReport,
};
use morpho_harness::tool::StatsConfig;
use morpho_harness::{CapabilityKind, ScorePolicy, TestShape, TestSpec, ValidationTest};

#[derive(Parser)]
#[command(name = "morpho", version, about = "Morphology validation harness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a raw observation (or prediction) tree to canonical JSON
    Normalize {
        /// Raw tree JSON
        #[arg(long)]
        input: PathBuf,
        /// Output path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Validate as a prediction ({value} leaves) instead of an observation
        #[arg(long)]
        prediction: bool,
    },
    /// Score a pre-computed prediction file against an observation file
    Score {
        #[arg(long)]
        observation: PathBuf,
        #[arg(long)]
        prediction: PathBuf,
        #[arg(long, default_value = "Validation Test")]
        name: String,
        #[arg(long, value_enum, default_value = "per-cell-part")]
        shape: CliShape,
        #[arg(long, value_enum, default_value = "mean-abs-zscore")]
        policy: CliPolicy,
        /// Capability the test binds; defaults by shape
        #[arg(long, value_enum)]
        capability: Option<CliCapability>,
        /// Model name for reports (default: prediction file stem)
        #[arg(long)]
        model_name: Option<String>,
        /// Write report artifacts into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Run the statistics tool against a morphology and score the result
    Run {
        #[arg(long)]
        observation: PathBuf,
        /// Morphology file (one cell) or directory (a population)
        #[arg(long)]
        morphology: PathBuf,
        #[arg(long, default_value = "morph-stats")]
        tool: PathBuf,
        #[arg(long, default_value = "./validation_output")]
        base_dir: PathBuf,
        #[arg(long, default_value = "Morphology Features Test")]
        name: String,
        /// Model name for reports (default: morphology file stem)
        #[arg(long)]
        model_name: Option<String>,
    },
    /// Render a markdown report from a scores summary JSON
    Report {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

/// CLI-facing tree shape enum (clap::ValueEnum).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliShape {
    SingleQuantity,
    PerLayer,
    PerCellPart,
    PopulationAveraged,
}

impl From<CliShape> for TestShape {
    fn from(s: CliShape) -> Self {
        match s {
            CliShape::SingleQuantity => TestShape::SingleQuantity,
            CliShape::PerLayer => TestShape::PerLayer,
            CliShape::PerCellPart => TestShape::PerCellPart,
            CliShape::PopulationAveraged => TestShape::PopulationAveraged,
        }
    }
}

/// CLI-facing score policy enum (clap::ValueEnum).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliPolicy {
    MeanAbsZscore,
    RangeCheck,
    RangeScore,
}

impl From<CliPolicy> for ScorePolicy {
    fn from(p: CliPolicy) -> Self {
        match p {
            CliPolicy::MeanAbsZscore => ScorePolicy::MeanAbsZScore,
            CliPolicy::RangeCheck => ScorePolicy::RangeCheck,
            CliPolicy::RangeScore => ScorePolicy::RangeScore,
        }
    }
}

/// CLI-facing capability enum (clap::ValueEnum).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliCapability {
    LayerInfo,
    DensityInfo,
    MorphFeatureInfo,
    SomaDiameter,
    Ca1PathDistance,
}

impl From<CliCapability> for CapabilityKind {
    fn from(c: CliCapability) -> Self {
        match c {
            CliCapability::LayerInfo => CapabilityKind::LayerInfo,
            CliCapability::DensityInfo => CapabilityKind::DensityInfo,
            CliCapability::MorphFeatureInfo => CapabilityKind::MorphFeatureInfo,
            CliCapability::SomaDiameter => CapabilityKind::SomaDiameter,
            CliCapability::Ca1PathDistance => CapabilityKind::Ca1PathDistance,
        }
    }
}

fn default_capability(shape: TestShape) -> CapabilityKind {
    match shape {
        TestShape::SingleQuantity => CapabilityKind::DensityInfo,
        TestShape::PerLayer => CapabilityKind::Ca1PathDistance,
        TestShape::PerCellPart | TestShape::PopulationAveraged => CapabilityKind::MorphFeatureInfo,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Normalize {
            input,
            out,
            prediction,
        } => {
            let raw: serde_json::Value = read_json(&input)?;
            let tree = normalize_tree(&raw)?;
            if prediction {
                morpho_harness::normalize::validate_prediction(&tree)?;
            } else {
                morpho_harness::normalize::validate_observation(&tree)?;
            }
            let json = serde_json::to_string_pretty(&tree)?;
            match out {
                Some(path) => std::fs::write(path, json)?,
                None => println!("{json}"),
            }
        }
        Commands::Score {
            observation,
            prediction,
            name,
            shape,
            policy,
            capability,
            model_name,
            out_dir,
        } => {
            let raw_obs: serde_json::Value = read_json(&observation)?;
            let raw_pred: serde_json::Value = read_json(&prediction)?;

            let shape = TestShape::from(shape);
            let capability = capability
                .map(CapabilityKind::from)
                .unwrap_or_else(|| default_capability(shape));
            let spec = TestSpec::new(name, shape, ScorePolicy::from(policy), capability);

            let model_name = model_name.unwrap_or_else(|| file_stem(&prediction));
            let model = StaticModel::new(model_name, raw_pred);

            let mut test = ValidationTest::new(spec, &raw_obs)?;
            test.generate_prediction(&model)?;
            test.compute_score()?;
            finish_run(&mut test, out_dir.as_deref())?;
        }
        Commands::Run {
            observation,
            morphology,
            tool,
            base_dir,
            name,
            model_name,
        } => {
            let raw_obs: serde_json::Value = read_json(&observation)?;
            let stats_config = StatsConfig::from_observation(&raw_obs)?;

            let shape = if morphology.is_dir() {
                TestShape::PopulationAveraged
            } else {
                TestShape::PerCellPart
            };
            let spec = TestSpec::new(
                name,
                shape,
                ScorePolicy::MeanAbsZScore,
                CapabilityKind::MorphFeatureInfo,
            );

            let model_name = model_name.unwrap_or_else(|| file_stem(&morphology));
            let run_config = RunConfig::new(base_dir, tool);
            let out_dir = run_config.output_dir(&spec.name, &model_name);
            ensure_dir(&out_dir)?;

            let model = MorphologyModel::new(
                model_name,
                morphology,
                run_config.tool_binary.clone(),
                out_dir.clone(),
                stats_config,
            )?;

            let mut test = ValidationTest::new(spec, &raw_obs)?;
            test.generate_prediction(&model)?;
            test.compute_score()?;
            finish_run(&mut test, Some(&out_dir))?;
        }
        Commands::Report { input, out } => {
            let report: TestReport = read_json(&input)?;
            std::fs::write(out, render_report_markdown(&report))?;
        }
    }

    Ok(())
}

/// Print the score table, then write and bind report artifacts.
fn finish_run(
    test: &mut ValidationTest,
    out_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_text_table(test)?);

    if let Some(dir) = out_dir {
        let report = build_report(test)?;
        let files = write_report_files(test, &report, dir)?;
        test.bind_artifacts(files)?;
        eprintln!("[morpho] report written to {}", dir.display());
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("model")
        .to_string()
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
