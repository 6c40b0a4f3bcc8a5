//! End-to-end pipeline tests on a synthetic mushroom dataset
//!
//! The archive is seeded at its artifact path before the run, so ingestion
//! takes the skip-download path and nothing touches the network.

use std::io::{Cursor, Write};
use std::path::Path;

use mushroom_core::{
    ArtifactKind, ConfigurationManager, MetricsRecord, PipelineError, Prediction, RawRecord,
    StageName,
};
use mushroom_trainer::{run_pipeline, stratified_split, PipelineRunner};
use proptest::prelude::*;
use tempfile::tempdir;

const COLUMNS: [&str; 12] = [
    "class",
    "bruises",
    "odor",
    "gill-spacing",
    "gill-size",
    "gill-color",
    "stalk-surface-above-ring",
    "stalk-surface-below-ring",
    "veil-type",
    "ring-type",
    "spore-print-color",
    "population",
];

/// 100 rows where odor `f` means poisonous.
fn dataset_csv(bad_label_at: Option<usize>) -> String {
    let pick = |options: &[&'static str], i: usize| options[i % options.len()];
    let mut text = COLUMNS.join(",");
    text.push('\n');
    for i in 0..100 {
        let odor = pick(&["f", "n", "f", "o", "n"], i);
        let class = match bad_label_at {
            Some(row) if row == i => "x",
            _ if odor == "f" => "p",
            _ => "e",
        };
        let row = [
            class,
            pick(&["t", "f"], i),
            odor,
            pick(&["w", "o"], i / 2),
            pick(&["b", "n"], i / 3),
            pick(&["b", "o"], i / 7),
            pick(&["k", "s"], i / 4),
            pick(&["s", "k", "o"], i),
            "p",
            pick(&["l", "p"], i / 6),
            pick(&["h", "k", "n", "w"], i / 3),
            pick(&["v", "o"], i / 11),
        ];
        text.push_str(&row.join(","));
        text.push('\n');
    }
    text
}

fn manager(root: &Path) -> ConfigurationManager {
    let config = format!(
        r#"
artifacts_root: {}
data_ingestion:
  source_url: https://drive.google.com/file/d/fixture/view
tracking:
  enabled: false
"#,
        root.display()
    );
    let params = r#"
DecisionTreeClassifier:
  criterion: gini
  max_leaf_nodes: 10
FeatureSelection:
  k: 19
"#;
    ConfigurationManager::from_documents(&config, params).unwrap()
}

fn seed_archive(manager: &ConfigurationManager, csv: &str) {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("mushrooms.csv", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(csv.as_bytes()).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let path = &manager.artifact_layout().raw_archive;
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn record(odor: &str) -> RawRecord {
    [
        ("bruises", "f"),
        ("odor", odor),
        ("gill-spacing", "o"),
        ("gill-size", "b"),
        ("gill-color", "o"),
        ("stalk-surface-above-ring", "k"),
        ("stalk-surface-below-ring", "k"),
        ("ring-type", "l"),
        ("spore-print-color", "h"),
        ("population", "v"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[test]
fn test_full_pipeline_produces_perfect_model() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    seed_archive(&manager, &dataset_csv(None));

    let report = run_pipeline(&manager).unwrap();
    assert_eq!(report.completed, StageName::ALL.to_vec());

    let layout = manager.artifact_layout();
    for kind in [
        ArtifactKind::RawTable,
        ArtifactKind::TransformedTable,
        ArtifactKind::FeatureSchema,
        ArtifactKind::TestSplit,
        ArtifactKind::Model,
        ArtifactKind::Metrics,
    ] {
        assert!(layout.path(kind).is_file(), "{kind} missing");
    }

    let metrics: MetricsRecord =
        serde_json::from_slice(&std::fs::read(&layout.metrics).unwrap()).unwrap();
    assert_eq!(metrics.accuracy, 1.0);
    assert_eq!(metrics.precision, 1.0);
    assert_eq!(metrics.recall, 1.0);
    assert_eq!(metrics.f1_score, 1.0);

    let prediction = Prediction::new(manager.prediction_config()).unwrap();
    assert_eq!(prediction.classify(&record("f")).unwrap(), vec![1]);
    assert_eq!(prediction.classify(&record("n")).unwrap(), vec![0]);
}

#[test]
fn test_rerun_is_idempotent() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    seed_archive(&manager, &dataset_csv(None));
    let layout = manager.artifact_layout();

    run_pipeline(&manager).unwrap();
    let table = std::fs::read(&layout.raw_table).unwrap();
    let transformed = std::fs::read(&layout.transformed_table).unwrap();
    let test_split = std::fs::read(&layout.test_split).unwrap();
    let model: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&layout.model).unwrap()).unwrap();

    run_pipeline(&manager).unwrap();
    assert_eq!(std::fs::read(&layout.raw_table).unwrap(), table);
    assert_eq!(std::fs::read(&layout.transformed_table).unwrap(), transformed);
    assert_eq!(std::fs::read(&layout.test_split).unwrap(), test_split);
    let again: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&layout.model).unwrap()).unwrap();
    assert_eq!(again["metadata"]["model_hash"], model["metadata"]["model_hash"]);
    assert_eq!(again["tree"], model["tree"]);
}

#[test]
fn test_transformation_failure_stops_pipeline() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    seed_archive(&manager, &dataset_csv(Some(17)));

    let err = run_pipeline(&manager).unwrap_err();
    assert!(matches!(err, PipelineError::Transformation(ref msg) if msg.contains("'x'")));

    let layout = manager.artifact_layout();
    assert!(layout.raw_table.is_file());
    assert!(!layout.transformed_table.exists());
    assert!(!layout.model.exists());
    assert!(!layout.metrics.exists());
}

#[test]
fn test_stage_resume_requires_upstream_artifact() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    let err = PipelineRunner::from_config(&manager)
        .run_stage(StageName::Evaluation)
        .unwrap_err();
    assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
}

#[test]
fn test_unsupported_source_without_archive() {
    let dir = tempdir().unwrap();
    let config = format!(
        "artifacts_root: {}\ndata_ingestion:\n  source_url: ftp://example.org/data.zip\n",
        dir.path().display()
    );
    let manager =
        ConfigurationManager::from_documents(&config, "DecisionTreeClassifier: {}\n").unwrap();

    let err = run_pipeline(&manager).unwrap_err();
    assert!(matches!(err, PipelineError::SourceUnsupported(_)));
}

proptest! {
    #[test]
    fn split_is_deterministic_and_stratified(
        zeros in 5usize..60,
        ones in 5usize..60,
        seed in any::<u64>(),
    ) {
        let mut targets = vec![0u8; zeros];
        targets.extend(std::iter::repeat(1u8).take(ones));

        let a = stratified_split(&targets, 0.2, seed).unwrap();
        let b = stratified_split(&targets, 0.2, seed).unwrap();
        prop_assert_eq!(&a, &b);

        let n = zeros + ones;
        prop_assert_eq!(a.test.len(), (0.2 * n as f64).ceil() as usize);
        prop_assert_eq!(a.train.len() + a.test.len(), n);

        let test_ones = a.test.iter().filter(|&&i| targets[i] == 1).count() as f64;
        let expected = a.test.len() as f64 * ones as f64 / n as f64;
        prop_assert!((test_ones - expected).abs() < 1.0);
    }
}
