//! Error types for rust_dge

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage at which an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Parse,
    IdentifierResolution,
    BackendInit,
    DifferentialExpression,
    Classification,
    Clustering,
    Enrichment,
    Export,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisStage::Parse => "parse",
            AnalysisStage::IdentifierResolution => "identifier resolution",
            AnalysisStage::BackendInit => "backend initialization",
            AnalysisStage::DifferentialExpression => "differential expression",
            AnalysisStage::Classification => "classification",
            AnalysisStage::Clustering => "clustering",
            AnalysisStage::Enrichment => "enrichment",
            AnalysisStage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Main error type for the analysis pipeline
#[derive(Error, Debug)]
pub enum DgeError {
    #[error("Parse error in {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("No identifiers could be translated from {namespace} ({n_queried} queried)")]
    NoIdentifiersTranslated { namespace: String, n_queried: usize },

    #[error(
        "Insufficient replication for {comparison}: condition '{condition}' has {n_samples} sample(s), at least 2 required"
    )]
    InsufficientReplication {
        comparison: String,
        condition: String,
        n_samples: usize,
    },

    #[error("Statistical backend is not ready (state: {state})")]
    BackendNotReady { state: String },

    #[error("Clustering failed: {reason}")]
    ClusteringFailed { reason: String },

    #[error("Enrichment failed for {comparison} against {database}: {reason}")]
    EnrichmentFailed {
        comparison: String,
        database: String,
        reason: String,
    },

    #[error("{service} exceeded its time limit of {seconds}s")]
    ExternalServiceTimeout { service: String, seconds: u64 },

    #[error("Identifier translation service error: {reason}")]
    TranslationService { reason: String },

    #[error("Background task failed: {reason}")]
    Background { reason: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Spreadsheet error: {0}")]
    SpreadsheetError(#[from] calamine::Error),
}

impl DgeError {
    pub(crate) fn parse(file: impl Into<String>, reason: impl Into<String>) -> Self {
        DgeError::Parse {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// A failed comparison inside a batch, with enough context to retry just that comparison
#[derive(Error, Debug)]
#[error("{comparison} failed during {stage}: {error}")]
pub struct ComparisonFailure {
    pub comparison: String,
    pub stage: AnalysisStage,
    #[source]
    pub error: DgeError,
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, DgeError>;
