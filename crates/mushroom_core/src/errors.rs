//! Error types for the pipeline stages and the inference boundary

use std::path::PathBuf;

use thiserror::Error;

use crate::artifacts::ArtifactKind;
use crate::config::StageName;

/// Errors raised by configuration, artifact handling and the four stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A stage read an artifact its upstream stage has not produced yet
    #[error("artifact {kind} not found at {}; run the producing stage first", .path.display())]
    ArtifactMissing { kind: ArtifactKind, path: PathBuf },

    /// The dataset locator uses a scheme no downloader handles
    #[error("unsupported data source: {0}")]
    SourceUnsupported(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("transformation failed: {0}")]
    Transformation(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Experiment tracking failed; callers decide whether to swallow it
    #[error("tracking failed: {0}")]
    Tracking(String),

    /// A feature matrix was built against a different schema than the model's
    #[error("feature schema mismatch: model expects {expected}, matrix has {found}")]
    SchemaMismatch { expected: String, found: String },

    /// A stage completed without error but reported failure
    #[error("stage {stage} reported failure")]
    Halted { stage: StageName },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Attribute a generic failure to the stage it happened in.
    ///
    /// Taxonomy variants pass through untouched. Raw I/O, serialization,
    /// schema and config failures raised while a stage runs are wrapped into
    /// the stage's own variant; stage configuration is resolved before this.
    pub fn within(self, stage: StageName) -> Self {
        match self {
            err @ (PipelineError::Io(_)
            | PipelineError::Serialization(_)
            | PipelineError::Config(_)
            | PipelineError::SchemaMismatch { .. }) => {
                let message = err.to_string();
                match stage {
                    StageName::Ingestion => PipelineError::Extraction(message),
                    StageName::Transformation => PipelineError::Transformation(message),
                    StageName::Training => PipelineError::Training(message),
                    StageName::Evaluation => PipelineError::Evaluation(message),
                }
            }
            other => other,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced at the inference boundary.
///
/// `Validation` is the caller's fault (4xx); everything else is a system
/// failure (5xx).
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("invalid record: {0}")]
    Validation(String),

    #[error("no model available: {0}")]
    ModelUnavailable(String),

    #[error("prediction failed: {0}")]
    Prediction(String),
}

impl InferenceError {
    pub fn is_validation(&self) -> bool {
        matches!(self, InferenceError::Validation(_))
    }

    /// HTTP-equivalent status for the failure
    pub fn status_code(&self) -> u16 {
        if self.is_validation() {
            422
        } else {
            500
        }
    }
}
