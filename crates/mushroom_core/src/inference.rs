//! Live single-record classification
//!
//! Every call loads the model afresh: the tracked snapshot for the configured
//! run first, then the local artifact the training stage last wrote. Records
//! are encoded with the schema stored in whichever model was loaded, so the
//! vector handed to the tree always has the columns the tree was fit on.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PredictionConfig;
use crate::encoder::{encode_record, normalize_column_name};
use crate::errors::{InferenceError, Result};
use crate::model::ClassifierArtifact;
use crate::table::RawRecord;
use crate::tracking::{tracker_from_config, ExperimentTracker};

/// Input fields accepted by the classifier and their allowed codes.
pub const RECORD_FIELDS: [(&str, &str); 10] = [
    ("bruises", "tf"),
    ("odor", "fno"),
    ("gill_spacing", "wo"),
    ("gill_size", "bn"),
    ("gill_color", "bo"),
    ("stalk_surface_above_ring", "kso"),
    ("stalk_surface_below_ring", "kso"),
    ("ring_type", "lpo"),
    ("spore_print_color", "hknwo"),
    ("population", "vo"),
];

/// Checks an inbound record before it reaches the encoder.
#[derive(Debug, Clone)]
pub struct RecordValidator {
    fields: BTreeMap<&'static str, &'static str>,
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self {
            fields: RECORD_FIELDS.into_iter().collect(),
        }
    }
}

impl RecordValidator {
    /// Normalize keys, require every field, and check each code.
    ///
    /// Fields outside the accepted set are dropped.
    pub fn validate(&self, record: &RawRecord) -> std::result::Result<RawRecord, InferenceError> {
        let normalized: BTreeMap<String, &str> = record
            .iter()
            .map(|(k, v)| (normalize_column_name(k), v.trim()))
            .collect();

        let mut clean = RawRecord::new();
        for (&field, &alphabet) in &self.fields {
            let value = normalized
                .get(field)
                .ok_or_else(|| InferenceError::Validation(format!("missing field '{field}'")))?;
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if alphabet.contains(c) => {
                    clean.insert(field.to_string(), value.to_string());
                }
                _ => {
                    return Err(InferenceError::Validation(format!(
                        "field '{field}' must be one of [{alphabet}], got '{value}'"
                    )))
                }
            }
        }
        Ok(clean)
    }

    /// Parse a JSON object of string fields into a record.
    pub fn parse_json(&self, text: &str) -> std::result::Result<RawRecord, InferenceError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| InferenceError::Validation(format!("record is not valid JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| InferenceError::Validation("record must be a JSON object".to_string()))?;

        object
            .iter()
            .map(|(key, value)| match value.as_str() {
                Some(s) => Ok((key.clone(), s.to_string())),
                None => Err(InferenceError::Validation(format!(
                    "field '{key}' must be a string"
                ))),
            })
            .collect()
    }
}

/// Inference entry point.
pub struct Prediction {
    config: PredictionConfig,
    tracker: Box<dyn ExperimentTracker>,
    validator: RecordValidator,
}

impl Prediction {
    pub fn new(config: PredictionConfig) -> Result<Self> {
        let tracker = tracker_from_config(&config.tracking)?;
        Ok(Self::with_tracker(config, tracker))
    }

    pub fn with_tracker(config: PredictionConfig, tracker: Box<dyn ExperimentTracker>) -> Self {
        Self {
            config,
            tracker,
            validator: RecordValidator::default(),
        }
    }

    pub fn validator(&self) -> &RecordValidator {
        &self.validator
    }

    /// Tracked snapshot if reachable and valid, otherwise the local artifact.
    pub fn load_model(&self) -> std::result::Result<ClassifierArtifact, InferenceError> {
        let tracking = &self.config.tracking;
        if let (true, Some(run_id)) = (tracking.enabled, tracking.run_id.as_deref()) {
            let fetched = self
                .tracker
                .fetch_model(run_id, &tracking.model_artifact)
                .and_then(|bytes| ClassifierArtifact::from_json_slice(&bytes));
            match fetched {
                Ok(model) => {
                    info!(run_id, "Loaded tracked model");
                    return Ok(model);
                }
                Err(e) => warn!(
                    run_id,
                    "Tracked model unavailable, falling back to local artifact: {}", e
                ),
            }
        }

        let path = &self.config.model_path;
        let bytes = std::fs::read(path).map_err(|e| {
            InferenceError::ModelUnavailable(format!("{}: {}", path.display(), e))
        })?;
        ClassifierArtifact::from_json_slice(&bytes)
            .map_err(|e| InferenceError::ModelUnavailable(format!("{}: {}", path.display(), e)))
    }

    pub fn classify(&self, record: &RawRecord) -> std::result::Result<Vec<u8>, InferenceError> {
        let record = self.validator.validate(record)?;
        let model = self.load_model()?;
        let matrix = encode_record(&record, &model.schema)
            .map_err(|e| InferenceError::Prediction(e.to_string()))?;
        model
            .predict(&matrix)
            .map_err(|e| InferenceError::Prediction(e.to_string()))
    }
}

/// Structured payload returned to callers of [`predict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Ok {
        result: Vec<u8>,
    },
    ValidationFailed {
        error: String,
        kind: String,
        status: u16,
    },
    SystemFailure {
        error: String,
        kind: String,
        status: u16,
    },
}

impl PredictionResponse {
    pub fn status(&self) -> u16 {
        match self {
            PredictionResponse::Ok { .. } => 200,
            PredictionResponse::ValidationFailed { status, .. }
            | PredictionResponse::SystemFailure { status, .. } => *status,
        }
    }
}

impl From<InferenceError> for PredictionResponse {
    fn from(err: InferenceError) -> Self {
        let kind = match &err {
            InferenceError::Validation(_) => "validation",
            InferenceError::ModelUnavailable(_) => "model_unavailable",
            InferenceError::Prediction(_) => "prediction",
        }
        .to_string();
        let status = err.status_code();
        let error = err.to_string();
        if err.is_validation() {
            PredictionResponse::ValidationFailed {
                error,
                kind,
                status,
            }
        } else {
            PredictionResponse::SystemFailure {
                error,
                kind,
                status,
            }
        }
    }
}

/// Classify one record and report the outcome as a payload.
pub fn predict(prediction: &Prediction, record: &RawRecord) -> PredictionResponse {
    match prediction.classify(record) {
        Ok(result) => PredictionResponse::Ok { result },
        Err(e) => {
            if e.is_validation() {
                warn!("Rejected record: {}", e);
            } else {
                error!("Prediction failed: {}", e);
            }
            e.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::encoder::FeatureSchema;
    use crate::model::{DecisionTree, TreeNode, TreeParams};
    use crate::tracking::NoopTracker;
    use std::path::Path;
    use tempfile::tempdir;

    fn scenario_record() -> RawRecord {
        [
            ("bruises", "f"),
            ("odor", "f"),
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

    /// odor_f <= 0 → edible, otherwise poisonous
    fn write_model(path: &Path) {
        let schema = FeatureSchema::mushroom_default();
        let odor_f = schema.columns().iter().position(|c| c == "odor_f").unwrap() as i32;
        let tree = DecisionTree::new(vec![
            TreeNode::internal(0, odor_f, 0, 1, 2, [4, 4]),
            TreeNode::leaf(1, 0, [4, 0]),
            TreeNode::leaf(2, 1, [0, 4]),
        ]);
        let model = ClassifierArtifact::new(schema, TreeParams::default(), tree, 8).unwrap();
        std::fs::write(path, model.to_json_bytes().unwrap()).unwrap();
    }

    fn local_config(model_path: &Path) -> PredictionConfig {
        PredictionConfig {
            model_path: model_path.to_path_buf(),
            tracking: TrackingConfig::default(),
        }
    }

    #[test]
    fn classifies_scenario_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        write_model(&path);

        let prediction = Prediction::new(local_config(&path)).unwrap();
        assert_eq!(prediction.classify(&scenario_record()).unwrap(), vec![1]);
        assert_eq!(
            predict(&prediction, &scenario_record()),
            PredictionResponse::Ok { result: vec![1] }
        );
    }

    #[test]
    fn falls_back_to_local_when_tracker_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        write_model(&path);

        let mut config = local_config(&path);
        config.tracking = TrackingConfig {
            enabled: true,
            tracking_uri: "http://127.0.0.1:9".to_string(),
            run_id: Some("missing-run".to_string()),
            ..TrackingConfig::default()
        };
        let prediction = Prediction::with_tracker(config, Box::new(NoopTracker));
        assert_eq!(prediction.classify(&scenario_record()).unwrap(), vec![1]);
    }

    #[test]
    fn missing_model_is_system_failure() {
        let dir = tempdir().unwrap();
        let prediction = Prediction::new(local_config(&dir.path().join("absent.json"))).unwrap();

        let response = predict(&prediction, &scenario_record());
        assert_eq!(response.status(), 500);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "model_unavailable");
    }

    #[test]
    fn invalid_code_is_validation_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        write_model(&path);
        let prediction = Prediction::new(local_config(&path)).unwrap();

        let mut record = scenario_record();
        record.insert("odor".to_string(), "z".to_string());
        let response = predict(&prediction, &record);
        assert_eq!(response.status(), 422);

        record.remove("odor");
        assert!(prediction.classify(&record).unwrap_err().is_validation());
    }

    #[test]
    fn parse_json_requires_string_fields() {
        let validator = RecordValidator::default();
        let record = validator.parse_json(r#"{"odor": "n", "ring-type": "p"}"#).unwrap();
        assert_eq!(record.get("ring-type").map(String::as_str), Some("p"));
        assert!(validator.parse_json(r#"{"odor": 1}"#).is_err());
        assert!(validator.parse_json("[]").is_err());
    }

    #[test]
    fn success_payload_shape() {
        let json = serde_json::to_string(&PredictionResponse::Ok { result: vec![0] }).unwrap();
        assert_eq!(json, r#"{"result":[0]}"#);
    }
}
