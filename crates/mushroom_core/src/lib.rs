//! Mushroom classification core
//!
//! Shared pieces of the training pipeline and the live inference path:
//!
//! Modules:
//! - `config`: Two-document configuration resolved into per-stage records
//! - `artifacts`: Deterministic artifact paths and atomic reads/writes
//! - `table`: Raw categorical tables and encoded labeled tables (CSV)
//! - `encoder`: One-hot encoding and the expected feature schema contract
//! - `model`: Decision-tree classifier artifact and prediction
//! - `metrics`: Binary classification metrics record
//! - `tracking`: Optional experiment-tracking side channel
//! - `inference`: Single-record classification with local fallback
//! - `serialization`: Canonical JSON helpers for hashed artifacts

pub mod artifacts;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod serialization;
pub mod table;
pub mod tracking;

pub use artifacts::{write_atomic, ArtifactKind, ArtifactLayout, ArtifactStore};
pub use config::{
    ConfigurationManager, DataIngestionConfig, DataTransformationConfig, ModelEvaluationConfig,
    ModelTrainingConfig, PredictionConfig, StageConfig, StageName, TrackingConfig,
};
pub use encoder::{
    encode_record, normalize_column_name, EncodedFrame, FeatureMatrix, FeatureSchema,
    OneHotEncoder, EXPECTED_FEATURES,
};
pub use errors::{InferenceError, PipelineError, Result};
pub use inference::{predict, Prediction, PredictionResponse, RecordValidator};
pub use metrics::MetricsRecord;
pub use model::{ClassifierArtifact, Criterion, DecisionTree, TreeNode, TreeParams};
pub use table::{LabeledTable, RawRecord, RawTable, TARGET_COLUMN};
pub use tracking::{tracker_from_config, ExperimentTracker, MlflowTracker, NoopTracker, RunHandle};

/// Crate version string recorded in model metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
