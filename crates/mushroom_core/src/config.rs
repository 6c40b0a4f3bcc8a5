//! Configuration resolution
//!
//! Two YAML documents drive a run: `config/config.yaml` holds structural
//! settings (artifact directories, the dataset locator, tracking endpoint)
//! and `params.yaml` holds model hyperparameters. Both are parsed once,
//! environment overrides are applied, and the result is handed out as
//! immutable per-stage records.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactLayout;
use crate::errors::{PipelineError, Result};
use crate::model::TreeParams;

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Ingestion,
    Transformation,
    Training,
    Evaluation,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Ingestion,
        StageName::Transformation,
        StageName::Training,
        StageName::Evaluation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Ingestion => "data_ingestion",
            StageName::Transformation => "data_transformation",
            StageName::Training => "model_training",
            StageName::Evaluation => "model_evaluation",
        }
    }

    /// Human-readable label used in start/finish log banners
    pub fn banner(&self) -> &'static str {
        match self {
            StageName::Ingestion => "DATA INGESTION STAGE",
            StageName::Transformation => "DATA TRANSFORMATION STAGE",
            StageName::Training => "MODEL TRAINING STAGE",
            StageName::Evaluation => "MODEL EVALUATION STAGE",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ingest" | "ingestion" | "data_ingestion" => Ok(StageName::Ingestion),
            "transform" | "transformation" | "data_transformation" => {
                Ok(StageName::Transformation)
            }
            "train" | "training" | "model_training" => Ok(StageName::Training),
            "evaluate" | "evaluation" | "model_evaluation" => Ok(StageName::Evaluation),
            other => Err(PipelineError::Config(format!("unknown stage '{other}'"))),
        }
    }
}

/// Experiment-tracking settings shared by training, evaluation and inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Selects the tracking-enabled stage variants
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tracking_uri")]
    pub tracking_uri: String,
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,
    /// Run whose model snapshot the inference path tries first
    #[serde(default)]
    pub run_id: Option<String>,
    /// Artifact path of the model snapshot inside a tracked run
    #[serde(default = "default_model_artifact")]
    pub model_artifact: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tracking_uri: default_tracking_uri(),
            experiment_id: default_experiment_id(),
            run_id: None,
            model_artifact: default_model_artifact(),
        }
    }
}

fn default_tracking_uri() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_experiment_id() -> String {
    "0".to_string()
}

fn default_model_artifact() -> String {
    "model/decision_tree_model.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigDocument {
    artifacts_root: PathBuf,
    data_ingestion: IngestionSection,
    #[serde(default)]
    data_transformation: TransformationSection,
    #[serde(default)]
    model_training: TrainingSection,
    #[serde(default)]
    model_evaluation: EvaluationSection,
    #[serde(default)]
    tracking: TrackingConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct IngestionSection {
    #[serde(default = "IngestionSection::default_root")]
    root_dir: PathBuf,
    source_url: String,
    #[serde(default = "IngestionSection::default_archive")]
    archive_file: String,
    #[serde(default)]
    unzip_dir: Option<PathBuf>,
    #[serde(default = "IngestionSection::default_raw_table")]
    raw_table_file: String,
}

impl IngestionSection {
    fn default_root() -> PathBuf {
        PathBuf::from(StageName::Ingestion.as_str())
    }

    fn default_archive() -> String {
        "data.zip".to_string()
    }

    fn default_raw_table() -> String {
        "mushrooms.csv".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TransformationSection {
    root_dir: PathBuf,
    transformed_file: String,
    schema_file: String,
}

impl Default for TransformationSection {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(StageName::Transformation.as_str()),
            transformed_file: "df_transformed.csv".to_string(),
            schema_file: "feature_schema.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TrainingSection {
    root_dir: PathBuf,
    test_file: String,
    model_file: String,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(StageName::Training.as_str()),
            test_file: "test.csv".to_string(),
            model_file: "decision_tree_model.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct EvaluationSection {
    root_dir: PathBuf,
    scores_file: String,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(StageName::Evaluation.as_str()),
            scores_file: "scores.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ParamsDocument {
    #[serde(rename = "DecisionTreeClassifier")]
    decision_tree: TreeParams,
    #[serde(rename = "FeatureSelection", default)]
    feature_selection: FeatureSelectionParams,
    #[serde(rename = "TrainTestSplit", default)]
    split: SplitParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct FeatureSelectionParams {
    k: usize,
}

impl Default for FeatureSelectionParams {
    fn default() -> Self {
        Self { k: 19 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SplitParams {
    test_size: f64,
    random_state: u64,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
        }
    }
}

/// Inputs and outputs of the ingestion stage
#[derive(Debug, Clone, PartialEq)]
pub struct DataIngestionConfig {
    pub root_dir: PathBuf,
    pub source_url: String,
    pub archive_path: PathBuf,
    pub unzip_dir: PathBuf,
    pub raw_table_path: PathBuf,
    pub artifacts: ArtifactLayout,
}

/// Inputs and outputs of the transformation stage
#[derive(Debug, Clone, PartialEq)]
pub struct DataTransformationConfig {
    pub root_dir: PathBuf,
    pub raw_table_path: PathBuf,
    pub transformed_path: PathBuf,
    pub schema_path: PathBuf,
    /// Number of encoded features kept by selection
    pub k_features: usize,
    pub artifacts: ArtifactLayout,
}

/// Inputs, outputs and hyperparameters of the training stage
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTrainingConfig {
    pub root_dir: PathBuf,
    pub transformed_path: PathBuf,
    pub schema_path: PathBuf,
    pub test_path: PathBuf,
    pub model_path: PathBuf,
    pub params: TreeParams,
    pub test_size: f64,
    pub random_state: u64,
    pub tracking: TrackingConfig,
    pub artifacts: ArtifactLayout,
}

/// Inputs and outputs of the evaluation stage
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluationConfig {
    pub root_dir: PathBuf,
    pub test_path: PathBuf,
    pub model_path: PathBuf,
    pub scores_path: PathBuf,
    pub tracking: TrackingConfig,
    pub artifacts: ArtifactLayout,
}

/// Settings for the live inference path
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionConfig {
    /// Most recently persisted local model artifact
    pub model_path: PathBuf,
    pub tracking: TrackingConfig,
}

/// A resolved, stage-specific configuration record
#[derive(Debug, Clone, PartialEq)]
pub enum StageConfig {
    Ingestion(DataIngestionConfig),
    Transformation(DataTransformationConfig),
    Training(ModelTrainingConfig),
    Evaluation(ModelEvaluationConfig),
}

impl StageConfig {
    pub fn stage(&self) -> StageName {
        match self {
            StageConfig::Ingestion(_) => StageName::Ingestion,
            StageConfig::Transformation(_) => StageName::Transformation,
            StageConfig::Training(_) => StageName::Training,
            StageConfig::Evaluation(_) => StageName::Evaluation,
        }
    }
}

/// Loads both configuration documents and resolves stage records.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: ConfigDocument,
    params: ParamsDocument,
    layout: ArtifactLayout,
}

impl ConfigurationManager {
    pub const DEFAULT_CONFIG_PATH: &'static str = "config/config.yaml";
    pub const DEFAULT_PARAMS_PATH: &'static str = "params.yaml";

    /// Read both documents from disk and apply environment overrides.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(config_path: P, params_path: Q) -> Result<Self> {
        let config_path = config_path.as_ref();
        let params_path = params_path.as_ref();
        info!(
            "Loading configuration from {} and {}",
            config_path.display(),
            params_path.display()
        );

        let config_text = read_document(config_path)?;
        let params_text = read_document(params_path)?;

        let mut config = parse_config(&config_text)?;
        apply_env_overrides(&mut config);
        let params = parse_params(&params_text)?;

        Self::build(config, params)
    }

    /// Build from in-memory documents; environment overrides are not applied.
    pub fn from_documents(config_yaml: &str, params_yaml: &str) -> Result<Self> {
        Self::build(parse_config(config_yaml)?, parse_params(params_yaml)?)
    }

    fn build(config: ConfigDocument, params: ParamsDocument) -> Result<Self> {
        if config.data_ingestion.source_url.trim().is_empty() {
            return Err(PipelineError::Config(
                "data_ingestion.source_url must not be empty".to_string(),
            ));
        }

        let root = &config.artifacts_root;
        let ingestion_dir = root.join(&config.data_ingestion.root_dir);
        let unzip_dir = config
            .data_ingestion
            .unzip_dir
            .as_ref()
            .map(|dir| root.join(dir))
            .unwrap_or_else(|| ingestion_dir.clone());
        let transformation_dir = root.join(&config.data_transformation.root_dir);
        let training_dir = root.join(&config.model_training.root_dir);
        let evaluation_dir = root.join(&config.model_evaluation.root_dir);

        let layout = ArtifactLayout {
            raw_archive: ingestion_dir.join(&config.data_ingestion.archive_file),
            raw_table: unzip_dir.join(&config.data_ingestion.raw_table_file),
            transformed_table: transformation_dir
                .join(&config.data_transformation.transformed_file),
            feature_schema: transformation_dir.join(&config.data_transformation.schema_file),
            test_split: training_dir.join(&config.model_training.test_file),
            model: training_dir.join(&config.model_training.model_file),
            metrics: evaluation_dir.join(&config.model_evaluation.scores_file),
        };
        debug!(?layout, "Resolved artifact layout");

        Ok(Self {
            config,
            params,
            layout,
        })
    }

    /// Deterministic artifact paths for this run
    pub fn artifact_layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.config.tracking
    }

    /// Non-fatal configuration problems worth surfacing in the logs.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.params.feature_selection.k == 0 {
            warnings.push("FeatureSelection.k is 0; no features will be kept".to_string());
        }
        if !(0.0..1.0).contains(&self.params.split.test_size) || self.params.split.test_size == 0.0
        {
            warnings.push(format!(
                "TrainTestSplit.test_size {} is outside (0, 1)",
                self.params.split.test_size
            ));
        }
        if self.config.tracking.enabled && self.config.tracking.tracking_uri.trim().is_empty() {
            warnings.push("tracking enabled but tracking_uri is empty".to_string());
        }
        if !self.params.decision_tree.extra.is_empty() {
            let keys: Vec<&str> = self
                .params
                .decision_tree
                .extra
                .keys()
                .map(String::as_str)
                .collect();
            warnings.push(format!(
                "DecisionTreeClassifier keys not used by the tree builder: {}",
                keys.join(", ")
            ));
        }

        if warnings.is_empty() {
            info!("Configuration validation passed");
        } else {
            warn!("Configuration validation warnings: {:?}", warnings);
        }
        warnings
    }

    /// Resolve the record for one stage, creating its output directories.
    pub fn resolve(&self, stage: StageName) -> Result<StageConfig> {
        Ok(match stage {
            StageName::Ingestion => StageConfig::Ingestion(self.data_ingestion_config()?),
            StageName::Transformation => {
                StageConfig::Transformation(self.data_transformation_config()?)
            }
            StageName::Training => StageConfig::Training(self.model_training_config()?),
            StageName::Evaluation => StageConfig::Evaluation(self.model_evaluation_config()?),
        })
    }

    pub fn data_ingestion_config(&self) -> Result<DataIngestionConfig> {
        let root_dir = self.config.artifacts_root.join(&self.config.data_ingestion.root_dir);
        let unzip_dir = parent_dir(&self.layout.raw_table);
        create_directories(&[&root_dir, &unzip_dir])?;

        Ok(DataIngestionConfig {
            root_dir,
            source_url: self.config.data_ingestion.source_url.clone(),
            archive_path: self.layout.raw_archive.clone(),
            unzip_dir,
            raw_table_path: self.layout.raw_table.clone(),
            artifacts: self.layout.clone(),
        })
    }

    pub fn data_transformation_config(&self) -> Result<DataTransformationConfig> {
        let root_dir = self
            .config
            .artifacts_root
            .join(&self.config.data_transformation.root_dir);
        create_directories(&[&root_dir])?;

        Ok(DataTransformationConfig {
            root_dir,
            raw_table_path: self.layout.raw_table.clone(),
            transformed_path: self.layout.transformed_table.clone(),
            schema_path: self.layout.feature_schema.clone(),
            k_features: self.params.feature_selection.k,
            artifacts: self.layout.clone(),
        })
    }

    pub fn model_training_config(&self) -> Result<ModelTrainingConfig> {
        let root_dir = self.config.artifacts_root.join(&self.config.model_training.root_dir);
        create_directories(&[&root_dir])?;

        Ok(ModelTrainingConfig {
            root_dir,
            transformed_path: self.layout.transformed_table.clone(),
            schema_path: self.layout.feature_schema.clone(),
            test_path: self.layout.test_split.clone(),
            model_path: self.layout.model.clone(),
            params: self.params.decision_tree.clone(),
            test_size: self.params.split.test_size,
            random_state: self.params.split.random_state,
            tracking: self.config.tracking.clone(),
            artifacts: self.layout.clone(),
        })
    }

    pub fn model_evaluation_config(&self) -> Result<ModelEvaluationConfig> {
        let root_dir = self
            .config
            .artifacts_root
            .join(&self.config.model_evaluation.root_dir);
        create_directories(&[&root_dir])?;

        Ok(ModelEvaluationConfig {
            root_dir,
            test_path: self.layout.test_split.clone(),
            model_path: self.layout.model.clone(),
            scores_path: self.layout.metrics.clone(),
            tracking: self.config.tracking.clone(),
            artifacts: self.layout.clone(),
        })
    }

    /// Inference settings; nothing is created on disk.
    pub fn prediction_config(&self) -> PredictionConfig {
        PredictionConfig {
            model_path: self.layout.model.clone(),
            tracking: self.config.tracking.clone(),
        }
    }
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Config(format!("failed to read {}: {}", path.display(), e)))
}

fn parse_config(text: &str) -> Result<ConfigDocument> {
    serde_yaml::from_str(text)
        .map_err(|e| PipelineError::Config(format!("invalid config document: {e}")))
}

fn parse_params(text: &str) -> Result<ParamsDocument> {
    serde_yaml::from_str(text)
        .map_err(|e| PipelineError::Config(format!("invalid params document: {e}")))
}

fn apply_env_overrides(config: &mut ConfigDocument) {
    if let Ok(val) = std::env::var("MUSHROOM_ARTIFACTS_ROOT") {
        if !val.trim().is_empty() {
            config.artifacts_root = PathBuf::from(val.trim());
        }
    }

    if let Ok(val) = std::env::var("MLFLOW_TRACKING_URI") {
        if !val.trim().is_empty() {
            config.tracking.tracking_uri = val.trim().to_string();
        }
    }

    if let Ok(val) = std::env::var("MLFLOW_EXPERIMENT_ID") {
        if !val.trim().is_empty() {
            config.tracking.experiment_id = val.trim().to_string();
        }
    }

    if let Ok(val) = std::env::var("MUSHROOM_TRACKING_ENABLED") {
        config.tracking.enabled = val.trim().parse().unwrap_or(config.tracking.enabled);
    }

    if let Ok(val) = std::env::var("MUSHROOM_TRACKING_RUN_ID") {
        config.tracking.run_id = Some(val.trim().to_string()).filter(|v| !v.is_empty());
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Create every directory in `dirs`; safe to call repeatedly.
pub fn create_directories(dirs: &[&Path]) -> Result<()> {
    for dir in dirs {
        std::fs::create_dir_all(dir).map_err(|e| {
            PipelineError::Config(format!("cannot create directory {}: {}", dir.display(), e))
        })?;
        debug!("Ensured directory {}", dir.display());
    }
    Ok(())
}
