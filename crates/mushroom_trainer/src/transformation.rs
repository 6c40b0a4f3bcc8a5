//! Data transformation: raw categorical table to encoded, selected features
//!
//! Explore, drop outliers, encode, select. Both outputs (the transformed
//! table and its feature schema) are written only after every sub-step has
//! succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use mushroom_core::table::MISSING_MARKER;
use mushroom_core::{
    ArtifactKind, ArtifactStore, DataTransformationConfig, FeatureSchema, LabeledTable,
    OneHotEncoder, PipelineError, RawTable, Result, StageName, TARGET_COLUMN,
};
use tracing::{debug, info};

use crate::selection::{f_classif, select_k_best};

/// Outlier fence multiplier
const IQR_FACTOR: f64 = 1.5;

/// Summary of a raw table, logged before any change is made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetProfile {
    pub rows: usize,
    pub columns: usize,
    pub distinct_values: BTreeMap<String, usize>,
    pub missing_markers: BTreeMap<String, usize>,
    pub class_balance: BTreeMap<String, usize>,
}

/// The transformation sub-steps, swappable as a unit.
pub trait FeatureEngineering {
    fn explore(&self, table: &RawTable) -> DatasetProfile;

    /// Drop rows outside the IQR fences of any numeric column.
    fn remove_outliers(&self, table: RawTable) -> Result<RawTable>;

    /// Encode the target and one-hot encode the features.
    fn preprocess(&self, table: RawTable) -> Result<LabeledTable>;

    /// Keep the `k` most class-discriminating columns.
    fn select_features(&self, table: LabeledTable, k: usize) -> Result<LabeledTable>;
}

/// Default strategy for all-categorical datasets
#[derive(Debug, Clone, Default)]
pub struct CategoricalFeatureEngineering;

impl FeatureEngineering for CategoricalFeatureEngineering {
    fn explore(&self, table: &RawTable) -> DatasetProfile {
        let mut distinct_values = BTreeMap::new();
        let mut missing_markers = BTreeMap::new();
        for (idx, column) in table.columns().iter().enumerate() {
            let values: BTreeSet<&str> = table.column_values(idx).collect();
            distinct_values.insert(column.clone(), values.len());
            let missing = table
                .column_values(idx)
                .filter(|v| *v == MISSING_MARKER)
                .count();
            if missing > 0 {
                missing_markers.insert(column.clone(), missing);
            }
        }

        let mut class_balance = BTreeMap::new();
        if let Some(idx) = table.column_index(TARGET_COLUMN) {
            for label in table.column_values(idx) {
                *class_balance.entry(label.to_string()).or_insert(0) += 1;
            }
        }

        let profile = DatasetProfile {
            rows: table.len(),
            columns: table.columns().len(),
            distinct_values,
            missing_markers,
            class_balance,
        };
        info!(
            rows = profile.rows,
            columns = profile.columns,
            "Dataset profile: class balance {:?}",
            profile.class_balance
        );
        if !profile.missing_markers.is_empty() {
            info!("Columns with '{}' markers: {:?}", MISSING_MARKER, profile.missing_markers);
        }
        debug!("Distinct values per column: {:?}", profile.distinct_values);
        profile
    }

    fn remove_outliers(&self, mut table: RawTable) -> Result<RawTable> {
        let mut keep = vec![true; table.len()];
        let mut numeric = Vec::new();

        for (idx, column) in table.columns().iter().enumerate() {
            if column == TARGET_COLUMN {
                continue;
            }
            let parsed: Option<Vec<f64>> = table
                .column_values(idx)
                .map(|v| v.parse::<f64>().ok().filter(|x| x.is_finite()))
                .collect();
            let Some(values) = parsed.filter(|v| !v.is_empty()) else {
                continue;
            };

            let mut sorted = values.clone();
            sorted.sort_by(f64::total_cmp);
            let q1 = quantile(&sorted, 0.25);
            let q3 = quantile(&sorted, 0.75);
            let iqr = q3 - q1;
            let (low, high) = (q1 - IQR_FACTOR * iqr, q3 + IQR_FACTOR * iqr);

            for (flag, v) in keep.iter_mut().zip(&values) {
                if *v < low || *v > high {
                    *flag = false;
                }
            }
            numeric.push(column.clone());
        }

        if numeric.is_empty() {
            debug!("No numeric columns; outlier removal skipped");
            return Ok(table);
        }

        let before = table.len();
        table.retain_rows(&keep);
        info!(
            columns = ?numeric,
            removed = before - table.len(),
            "Removed outliers"
        );
        Ok(table)
    }

    fn preprocess(&self, mut table: RawTable) -> Result<LabeledTable> {
        let labels = table.take_column(TARGET_COLUMN).ok_or_else(|| {
            PipelineError::Transformation(format!("raw table has no '{TARGET_COLUMN}' column"))
        })?;
        let targets = labels
            .iter()
            .enumerate()
            .map(|(row, label)| match label.as_str() {
                "e" => Ok(0u8),
                "p" => Ok(1u8),
                other => Err(PipelineError::Transformation(format!(
                    "row {}: unknown class label '{other}'",
                    row + 1
                ))),
            })
            .collect::<Result<Vec<u8>>>()?;

        let constant: Vec<String> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(idx, _)| table.column_values(*idx).collect::<BTreeSet<_>>().len() <= 1)
            .map(|(_, c)| c.clone())
            .collect();
        if !constant.is_empty() {
            info!("Dropping constant columns: {:?}", constant);
            table.drop_columns(&constant);
        }

        let frame = OneHotEncoder::fit_transform(&table)?;
        let (columns, rows) = frame.into_parts();
        info!(
            features = columns.len(),
            "Removed constant features and one-hot encoded categorical columns"
        );
        LabeledTable::new(columns, rows, targets)
    }

    fn select_features(&self, table: LabeledTable, k: usize) -> Result<LabeledTable> {
        let scores = f_classif(&table.features, &table.targets);
        let keep = select_k_best(&scores, k);

        let columns: Vec<String> = keep.iter().map(|&i| table.columns[i].clone()).collect();
        let features = table
            .features
            .iter()
            .map(|row| keep.iter().map(|&i| row[i]).collect())
            .collect();
        info!(k, selected = columns.len(), "Applied ANOVA-F feature selection");
        LabeledTable::new(columns, features, table.targets)
    }
}

/// Linear-interpolation quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = (sorted.len() - 1) as f64 * q;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

/// What a transformation run produced
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationOutput {
    pub transformed_path: PathBuf,
    pub schema_path: PathBuf,
    pub rows: usize,
    pub schema: FeatureSchema,
}

/// Transformation component.
pub struct DataTransformation<F: FeatureEngineering> {
    config: DataTransformationConfig,
    store: ArtifactStore,
    engineering: F,
}

impl DataTransformation<CategoricalFeatureEngineering> {
    pub fn new(config: DataTransformationConfig) -> Self {
        Self::with_engineering(config, CategoricalFeatureEngineering)
    }
}

impl<F: FeatureEngineering> DataTransformation<F> {
    pub fn with_engineering(config: DataTransformationConfig, engineering: F) -> Self {
        let store = ArtifactStore::new(config.artifacts.clone());
        Self {
            config,
            store,
            engineering,
        }
    }

    pub fn transform_data(&self) -> Result<TransformationOutput> {
        self.run().map_err(|e| e.within(StageName::Transformation))
    }

    fn run(&self) -> Result<TransformationOutput> {
        let raw = RawTable::from_reader(self.store.open(ArtifactKind::RawTable)?)?;
        info!("Loaded raw table from {}", self.config.raw_table_path.display());
        if raw.is_empty() {
            return Err(PipelineError::Transformation("raw table has no rows".to_string()));
        }

        self.engineering.explore(&raw);
        let trimmed = self.engineering.remove_outliers(raw)?;
        let encoded = self.engineering.preprocess(trimmed)?;
        let selected = self
            .engineering
            .select_features(encoded, self.config.k_features)?;
        let schema = FeatureSchema::new(&selected.columns)?;

        let bytes = selected.to_csv_bytes()?;
        let transformed_path = self.store.write(ArtifactKind::TransformedTable, &bytes)?;
        let schema_path = self.store.write_json(ArtifactKind::FeatureSchema, &schema)?;
        info!(
            rows = selected.len(),
            features = schema.len(),
            "Saved transformed data to {}",
            transformed_path.display()
        );

        Ok(TransformationOutput {
            transformed_path,
            schema_path,
            rows: selected.len(),
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mushroom_core::ConfigurationManager;
    use std::path::Path;
    use tempfile::tempdir;

    const RAW: &str = "\
class,odor,veil-type,gill-size
p,f,p,n
e,n,p,b
p,f,p,b
e,a,p,b
";

    fn raw() -> RawTable {
        RawTable::from_reader(RAW.as_bytes()).unwrap()
    }

    fn config(root: &Path, k: usize) -> DataTransformationConfig {
        let source = "https://drive.google.com/file/d/abc/view";
        let yaml = format!(
            "artifacts_root: {}\ndata_ingestion:\n  source_url: {source}\n",
            root.display()
        );
        let params = format!("DecisionTreeClassifier: {{}}\nFeatureSelection:\n  k: {k}\n");
        ConfigurationManager::from_documents(&yaml, &params)
            .unwrap()
            .data_transformation_config()
            .unwrap()
    }

    #[test]
    fn test_preprocess_encodes_and_drops_constants() {
        let table = CategoricalFeatureEngineering.preprocess(raw()).unwrap();

        assert_eq!(
            table.columns,
            vec!["odor_a", "odor_f", "odor_n", "gill_size_b", "gill_size_n"]
        );
        assert_eq!(table.targets, vec![1, 0, 1, 0]);
        assert_eq!(table.features[0], vec![0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_unknown_label_is_error() {
        let table = RawTable::from_reader("class,odor\nx,f\n".as_bytes()).unwrap();
        let err = CategoricalFeatureEngineering.preprocess(table).unwrap_err();
        assert!(matches!(err, PipelineError::Transformation(msg) if msg.contains("'x'")));
    }

    #[test]
    fn test_outliers_only_on_numeric_columns() {
        let text = "class,odor,size\np,f,1\ne,n,2\np,f,2\ne,a,3\np,n,100\n";
        let table = RawTable::from_reader(text.as_bytes()).unwrap();
        let trimmed = CategoricalFeatureEngineering.remove_outliers(table).unwrap();
        assert_eq!(trimmed.len(), 4);

        let categorical = CategoricalFeatureEngineering.remove_outliers(raw()).unwrap();
        assert_eq!(categorical, raw());
    }

    #[test]
    fn test_quantile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&data, 0.25) - 1.75).abs() < 1e-12);
        assert!((quantile(&data, 0.75) - 3.25).abs() < 1e-12);
        assert_eq!(quantile(&[5.0], 0.5), 5.0);
    }

    #[test]
    fn test_select_keeps_encoded_order() {
        let table = CategoricalFeatureEngineering.preprocess(raw()).unwrap();
        let selected = CategoricalFeatureEngineering.select_features(table.clone(), 2).unwrap();
        assert_eq!(selected.feature_count(), 2);
        let positions: Vec<usize> = selected
            .columns
            .iter()
            .map(|c| table.columns.iter().position(|t| t == c).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let all = CategoricalFeatureEngineering.select_features(table.clone(), 50).unwrap();
        assert_eq!(all.columns, table.columns);
    }

    #[test]
    fn test_profile_counts() {
        let text = "class,stalk-root\np,?\ne,b\ne,?\n";
        let table = RawTable::from_reader(text.as_bytes()).unwrap();
        let profile = CategoricalFeatureEngineering.explore(&table);
        assert_eq!(profile.rows, 3);
        assert_eq!(profile.missing_markers.get("stalk-root"), Some(&2));
        assert_eq!(profile.class_balance.get("e"), Some(&2));
    }

    #[test]
    fn test_transform_data_writes_table_and_schema() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 3);
        std::fs::create_dir_all(cfg.raw_table_path.parent().unwrap()).unwrap();
        std::fs::write(&cfg.raw_table_path, RAW).unwrap();

        let output = DataTransformation::new(cfg.clone()).transform_data().unwrap();
        assert_eq!(output.rows, 4);
        assert_eq!(output.schema.len(), 3);

        let written = LabeledTable::from_csv_path(&cfg.transformed_path).unwrap();
        assert_eq!(written.columns, output.schema.columns());
        let schema: FeatureSchema =
            serde_json::from_slice(&std::fs::read(&cfg.schema_path).unwrap()).unwrap();
        assert_eq!(schema, output.schema);
    }

    #[test]
    fn test_missing_raw_table_reports_artifact() {
        let dir = tempdir().unwrap();
        let err = DataTransformation::new(config(dir.path(), 19))
            .transform_data()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArtifactMissing {
                kind: ArtifactKind::RawTable,
                ..
            }
        ));
    }
}
