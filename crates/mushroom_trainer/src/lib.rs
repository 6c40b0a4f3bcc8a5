//! Mushroom classifier training pipeline
//!
//! Four stages run in order, each reading the artifacts of the one before:
//! ingestion (archive to raw table), transformation (raw table to encoded,
//! selected features), training (stratified split and CART fit) and
//! evaluation (metrics on the held-out split).

pub mod cart;
pub mod deterministic;
pub mod evaluation;
pub mod ingestion;
pub mod runner;
pub mod selection;
pub mod split;
pub mod training;
pub mod transformation;

use mushroom_core::{ConfigurationManager, Result};

pub use cart::CartBuilder;
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use evaluation::ModelEvaluation;
pub use ingestion::{
    ArchiveDownloader, DataIngestion, HttpDownloader, IngestionOutput, SourceLocator,
};
pub use runner::{PipelineRunner, PipelineStage, RunReport, StandardStage};
pub use selection::{f_classif, select_k_best};
pub use split::{stratified_split, SplitIndices};
pub use training::{ModelTraining, TrainingOutput};
pub use transformation::{
    CategoricalFeatureEngineering, DataTransformation, DatasetProfile, FeatureEngineering,
    TransformationOutput,
};

/// Run every stage with the standard components.
pub fn run_pipeline(manager: &ConfigurationManager) -> Result<RunReport> {
    PipelineRunner::from_config(manager).run()
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
