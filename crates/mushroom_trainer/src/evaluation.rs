//! Model evaluation: score the persisted model on the held-out split

use mushroom_core::tracking::best_effort;
use mushroom_core::{
    tracker_from_config, ArtifactKind, ArtifactStore, ClassifierArtifact, ExperimentTracker,
    LabeledTable, MetricsRecord, ModelEvaluationConfig, Result, StageName,
};
use tracing::info;

/// Evaluation component.
pub struct ModelEvaluation {
    config: ModelEvaluationConfig,
    store: ArtifactStore,
    tracker: Box<dyn ExperimentTracker>,
}

impl ModelEvaluation {
    pub fn new(config: ModelEvaluationConfig) -> Result<Self> {
        let tracker = tracker_from_config(&config.tracking)?;
        Ok(Self::with_tracker(config, tracker))
    }

    pub fn with_tracker(
        config: ModelEvaluationConfig,
        tracker: Box<dyn ExperimentTracker>,
    ) -> Self {
        let store = ArtifactStore::new(config.artifacts.clone());
        Self {
            config,
            store,
            tracker,
        }
    }

    /// Score the model, persist the metrics and optionally track them.
    pub fn evaluate(&self) -> Result<MetricsRecord> {
        let metrics = self.run().map_err(|e| e.within(StageName::Evaluation))?;
        if self.config.tracking.enabled {
            self.track(&metrics);
        }
        Ok(metrics)
    }

    fn run(&self) -> Result<MetricsRecord> {
        let model = ClassifierArtifact::from_json_slice(&self.store.read(ArtifactKind::Model)?)?;
        let test = LabeledTable::from_reader(self.store.open(ArtifactKind::TestSplit)?)?;
        info!(
            rows = test.len(),
            "Loaded model {} and test data",
            model.metadata.model_hash
        );

        // Stray columns (e.g. a saved index) are dropped here.
        let matrix = model.schema.reconcile(&test.to_frame());
        let predictions = model.predict(&matrix)?;
        let metrics = MetricsRecord::compute(&test.targets, &predictions)?;

        let path = self.store.write_json(ArtifactKind::Metrics, &metrics)?;
        info!(
            accuracy = metrics.accuracy,
            precision = metrics.precision,
            recall = metrics.recall,
            f1_score = metrics.f1_score,
            "Saved scores to {}",
            path.display()
        );
        Ok(metrics)
    }

    fn track(&self, metrics: &MetricsRecord) {
        let Some(run) = best_effort(
            "start_run",
            self.tracker.start_run(StageName::Evaluation.as_str()),
        ) else {
            return;
        };
        let logged = best_effort(
            "log_metrics",
            self.tracker.log_metrics(&run, &metrics.as_map()),
        )
        .is_some();
        best_effort("finish_run", self.tracker.finish_run(&run, logged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mushroom_core::model::{DecisionTree, TreeNode, TreeParams};
    use mushroom_core::{ConfigurationManager, FeatureSchema, NoopTracker, PipelineError};
    use std::path::Path;
    use tempfile::tempdir;

    fn config(root: &Path) -> ModelEvaluationConfig {
        let source = "https://drive.google.com/file/d/abc/view";
        let yaml = format!(
            "artifacts_root: {}\ndata_ingestion:\n  source_url: {source}\n",
            root.display()
        );
        ConfigurationManager::from_documents(&yaml, "DecisionTreeClassifier: {}\n")
            .unwrap()
            .model_evaluation_config()
            .unwrap()
    }

    fn write_model(path: &Path) {
        let schema = FeatureSchema::new(["odor_f", "odor_n"]).unwrap();
        let tree = DecisionTree::new(vec![
            TreeNode::internal(0, 0, 0, 1, 2, [2, 2]),
            TreeNode::leaf(1, 0, [2, 0]),
            TreeNode::leaf(2, 1, [0, 2]),
        ]);
        let model = ClassifierArtifact::new(schema, TreeParams::default(), tree, 4).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, model.to_json_bytes().unwrap()).unwrap();
    }

    #[test]
    fn test_perfect_model_scores_one() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        write_model(&cfg.model_path);
        // Leading index column is not part of the schema.
        std::fs::write(
            &cfg.test_path,
            "Unnamed: 0,odor_f,odor_n,class\n0,1,0,1\n1,0,1,0\n2,1,1,1\n",
        )
        .unwrap();

        let evaluation = ModelEvaluation::with_tracker(cfg.clone(), Box::new(NoopTracker));
        let metrics = evaluation.evaluate().unwrap();
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.f1_score, 1.0);

        let saved: MetricsRecord =
            serde_json::from_slice(&std::fs::read(&cfg.scores_path).unwrap()).unwrap();
        assert_eq!(saved, metrics);
    }

    #[test]
    fn test_missing_model_reports_artifact() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let err = ModelEvaluation::with_tracker(cfg, Box::new(NoopTracker))
            .evaluate()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArtifactMissing {
                kind: ArtifactKind::Model,
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_model_is_evaluation_error() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(cfg.model_path.parent().unwrap()).unwrap();
        std::fs::write(&cfg.model_path, b"{not json").unwrap();
        std::fs::write(&cfg.test_path, "odor_f,class\n1,1\n").unwrap();

        let err = ModelEvaluation::with_tracker(cfg, Box::new(NoopTracker))
            .evaluate()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Evaluation(_)));
    }
}
