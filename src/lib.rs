#![forbid(unsafe_code)]

//! # morpho-harness
//!
//! A validation harness for neuronal morphology models.
//!
//! Experimental observations and model predictions arrive as string-keyed
//! trees of quantities ("12.5 um"); the harness parses them into typed trees,
//! reconciles the naming quirks of the external morphology-statistics tool,
//! compares prediction against observation with Z-score based metrics, and
//! aggregates per-feature discrepancies into one scalar score per run.
//!
//! A [`harness::ValidationTest`] walks a strict life cycle: the observation
//! is validated at construction, a prediction is generated by binding one of
//! the model capability traits in [`capability`], the comparison is scored,
//! and report artifacts are bound last.

pub mod aggregate;
pub mod capability;
pub mod config;
pub mod harness;
pub mod model;
pub mod normalize;
pub mod quantity;
pub mod report;
pub mod score;
pub mod tool;

pub use capability::{Model, ModelError};
pub use harness::{
    CapabilityKind, HarnessError, ScorePolicy, TestOutcome, TestShape, TestSpec, TestState,
    ValidationTest,
};
pub use normalize::{normalize_tree, FeatureTree, FeatureValue, NormalizeError};
pub use quantity::{DimensionClass, Quantity, QuantityError, Unit};
pub use report::{build_report, render_report_markdown, write_report_files, TestReport};
pub use score::{ScoreError, ScoreKind, ScoreValue};
