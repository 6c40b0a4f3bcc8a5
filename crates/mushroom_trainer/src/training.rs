//! Model training: stratified split, CART fit, model artifact
//!
//! The held-out split is persisted before the tree is fit so evaluation
//! always scores against rows the model never saw.

use std::collections::BTreeMap;
use std::path::PathBuf;

use mushroom_core::tracking::best_effort;
use mushroom_core::{
    tracker_from_config, ArtifactKind, ArtifactStore, ClassifierArtifact, ExperimentTracker,
    FeatureSchema, LabeledTable, ModelTrainingConfig, PipelineError, Result, StageName,
    TreeParams,
};
use tracing::{info, warn};

use crate::cart::CartBuilder;
use crate::split::stratified_split;

/// What a training run produced
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub model_path: PathBuf,
    pub test_path: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
    pub model_hash: String,
}

/// Training component.
pub struct ModelTraining {
    config: ModelTrainingConfig,
    store: ArtifactStore,
    tracker: Box<dyn ExperimentTracker>,
}

impl ModelTraining {
    pub fn new(config: ModelTrainingConfig) -> Result<Self> {
        let tracker = tracker_from_config(&config.tracking)?;
        Ok(Self::with_tracker(config, tracker))
    }

    pub fn with_tracker(config: ModelTrainingConfig, tracker: Box<dyn ExperimentTracker>) -> Self {
        let store = ArtifactStore::new(config.artifacts.clone());
        Self {
            config,
            store,
            tracker,
        }
    }

    /// Load the transformed table, split it, and persist the test side.
    pub fn data_splits(&self) -> Result<(LabeledTable, LabeledTable, FeatureSchema)> {
        let table = LabeledTable::from_reader(self.store.open(ArtifactKind::TransformedTable)?)?;
        info!(rows = table.len(), "Loaded transformed data");
        let schema = self.feature_schema(&table)?;

        let split = stratified_split(
            &table.targets,
            self.config.test_size,
            self.config.random_state,
        )?;
        let train = table.subset(&split.train);
        let test = table.subset(&split.test);

        self.store
            .write(ArtifactKind::TestSplit, &test.to_csv_bytes()?)?;
        info!(
            train = train.len(),
            test = test.len(),
            "Saved the test dataset to {}",
            self.config.test_path.display()
        );
        Ok((train, test, schema))
    }

    /// Schema from the table header, checked against the persisted one.
    fn feature_schema(&self, table: &LabeledTable) -> Result<FeatureSchema> {
        let schema = FeatureSchema::new(&table.columns)?;
        if self.store.exists(ArtifactKind::FeatureSchema) {
            let recorded: FeatureSchema = self.store.read_json(ArtifactKind::FeatureSchema)?;
            if recorded != schema {
                return Err(PipelineError::SchemaMismatch {
                    expected: recorded.columns().join(","),
                    found: schema.columns().join(","),
                });
            }
        } else {
            warn!(
                "No feature schema at {}; using the transformed table header",
                self.config.schema_path.display()
            );
        }
        Ok(schema)
    }

    /// Fit the tree and persist the model artifact.
    pub fn train_model(
        &self,
        train: &LabeledTable,
        schema: FeatureSchema,
    ) -> Result<ClassifierArtifact> {
        let params = &self.config.params;
        if !params.extra.is_empty() {
            warn!(
                "Ignoring unsupported hyperparameters: {:?}",
                params.extra.keys().collect::<Vec<_>>()
            );
        }

        let tree = CartBuilder::new(&train.features, &train.targets, params)?.build();
        info!(
            nodes = tree.nodes.len(),
            depth = tree.depth(),
            leaves = tree.leaf_count(),
            criterion = %params.criterion,
            "Fitted decision tree"
        );

        let model = ClassifierArtifact::new(schema, params.clone(), tree, train.len())?;
        let path = self.store.write(ArtifactKind::Model, &model.to_json_bytes()?)?;
        info!(hash = %model.metadata.model_hash, "Model trained and saved at {}", path.display());
        Ok(model)
    }

    pub fn train(&self) -> Result<TrainingOutput> {
        let (train, test, schema) = self
            .data_splits()
            .map_err(|e| e.within(StageName::Training))?;
        let model = self
            .train_model(&train, schema)
            .map_err(|e| e.within(StageName::Training))?;

        if self.config.tracking.enabled {
            self.track(&model);
        }

        Ok(TrainingOutput {
            model_path: self.config.model_path.clone(),
            test_path: self.config.test_path.clone(),
            train_rows: train.len(),
            test_rows: test.len(),
            model_hash: model.metadata.model_hash.clone(),
        })
    }

    fn track(&self, model: &ClassifierArtifact) {
        let started = self.tracker.start_run(StageName::Training.as_str());
        let Some(run) = best_effort("start_run", started) else {
            return;
        };

        let mut params = params_to_strings(&self.config.params);
        params.insert("test_size".to_string(), self.config.test_size.to_string());
        params.insert("random_state".to_string(), self.config.random_state.to_string());
        let logged = best_effort("log_params", self.tracker.log_params(&run, &params)).is_some();

        let uploaded = match model.to_json_bytes() {
            Ok(bytes) => best_effort(
                "log_model",
                self.tracker
                    .log_model(&run, &self.config.tracking.model_artifact, &bytes),
            )
            .is_some(),
            Err(e) => {
                warn!("Could not serialize model for tracking: {}", e);
                false
            }
        };

        best_effort("finish_run", self.tracker.finish_run(&run, logged && uploaded));
        info!(run_id = %run.run_id, "Tracked training run");
    }
}

/// Flatten hyperparameters into tracker key/value pairs.
pub fn params_to_strings(params: &TreeParams) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert("criterion".to_string(), params.criterion.to_string());
    out.insert(
        "max_depth".to_string(),
        params
            .max_depth
            .map_or_else(|| "None".to_string(), |d| d.to_string()),
    );
    out.insert("min_samples_split".to_string(), params.min_samples_split.to_string());
    out.insert("min_samples_leaf".to_string(), params.min_samples_leaf.to_string());
    out.insert(
        "min_impurity_decrease".to_string(),
        params.min_impurity_decrease.to_string(),
    );
    for (key, value) in &params.extra {
        out.insert(key.clone(), value.to_string());
    }
    out
}
