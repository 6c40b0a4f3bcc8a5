//! Experiment tracking side channel
//!
//! Tracking is optional and selected by `tracking.enabled`. The pipeline never
//! depends on it: stages wrap every tracker call in [`best_effort`], and the
//! inference path treats any tracker failure as a cue to fall back to the
//! local artifact. `MlflowTracker` speaks the MLflow REST API.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TrackingConfig;
use crate::errors::{PipelineError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A run opened on the tracking backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub experiment_id: String,
}

/// Sink for parameters, metrics and model snapshots.
pub trait ExperimentTracker {
    fn start_run(&self, run_name: &str) -> Result<RunHandle>;

    fn log_params(&self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()>;

    fn log_metrics(&self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()>;

    /// Upload a serialized model under `artifact_path` in the run.
    fn log_model(&self, run: &RunHandle, artifact_path: &str, bytes: &[u8]) -> Result<()>;

    fn finish_run(&self, run: &RunHandle, succeeded: bool) -> Result<()>;

    /// Download a model snapshot previously logged to `run_id`.
    fn fetch_model(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>>;
}

/// Tracker used when tracking is disabled.
#[derive(Debug, Clone, Default)]
pub struct NoopTracker;

impl ExperimentTracker for NoopTracker {
    fn start_run(&self, run_name: &str) -> Result<RunHandle> {
        Ok(RunHandle {
            run_id: run_name.to_string(),
            experiment_id: String::new(),
        })
    }

    fn log_params(&self, _run: &RunHandle, _params: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    fn log_metrics(&self, _run: &RunHandle, _metrics: &BTreeMap<String, f64>) -> Result<()> {
        Ok(())
    }

    fn log_model(&self, _run: &RunHandle, _artifact_path: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn finish_run(&self, _run: &RunHandle, _succeeded: bool) -> Result<()> {
        Ok(())
    }

    fn fetch_model(&self, run_id: &str, _artifact_path: &str) -> Result<Vec<u8>> {
        Err(PipelineError::Tracking(format!(
            "tracking disabled; no model for run {run_id}"
        )))
    }
}

/// MLflow REST client
#[derive(Debug, Clone)]
pub struct MlflowTracker {
    client: reqwest::blocking::Client,
    base_url: String,
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunBody,
}

#[derive(Deserialize)]
struct RunBody {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
}

impl MlflowTracker {
    pub fn new(tracking_uri: &str, experiment_id: &str) -> Result<Self> {
        let base_url = tracking_uri.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(PipelineError::Config("tracking_uri is empty".to_string()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Tracking(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            experiment_id: experiment_id.to_string(),
        })
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, endpoint)
    }

    fn artifact_url(&self, run_id: &str, artifact_path: &str) -> String {
        format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}",
            self.base_url,
            self.experiment_id,
            run_id,
            artifact_path.trim_start_matches('/')
        )
    }

    fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<reqwest::blocking::Response> {
        let url = self.api(endpoint);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| PipelineError::Tracking(format!("{endpoint}: {e}")))?;
        check_status(endpoint, response)
    }
}

fn check_status(
    what: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().unwrap_or_default();
        Err(PipelineError::Tracking(format!(
            "{what}: HTTP {status}: {}",
            body.chars().take(200).collect::<String>()
        )))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl ExperimentTracker for MlflowTracker {
    fn start_run(&self, run_name: &str) -> Result<RunHandle> {
        let response = self.post(
            "runs/create",
            json!({
                "experiment_id": self.experiment_id,
                "run_name": run_name,
                "start_time": now_millis(),
            }),
        )?;
        let created: CreateRunResponse = response
            .json()
            .map_err(|e| PipelineError::Tracking(format!("runs/create: {e}")))?;

        Ok(RunHandle {
            run_id: created.run.info.run_id,
            experiment_id: self.experiment_id.clone(),
        })
    }

    fn log_params(&self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()> {
        let params: Vec<_> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        self.post("runs/log-batch", json!({ "run_id": run.run_id, "params": params }))?;
        Ok(())
    }

    fn log_metrics(&self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()> {
        let timestamp = now_millis();
        let metrics: Vec<_> = metrics
            .iter()
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 })
            })
            .collect();
        self.post("runs/log-batch", json!({ "run_id": run.run_id, "metrics": metrics }))?;
        Ok(())
    }

    fn log_model(&self, run: &RunHandle, artifact_path: &str, bytes: &[u8]) -> Result<()> {
        let url = self.artifact_url(&run.run_id, artifact_path);
        debug!(%url, bytes = bytes.len(), "PUT");
        let response = self
            .client
            .put(&url)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| PipelineError::Tracking(format!("artifact upload: {e}")))?;
        check_status("artifact upload", response)?;
        Ok(())
    }

    fn finish_run(&self, run: &RunHandle, succeeded: bool) -> Result<()> {
        let status = if succeeded { "FINISHED" } else { "FAILED" };
        self.post(
            "runs/update",
            json!({ "run_id": run.run_id, "status": status, "end_time": now_millis() }),
        )?;
        Ok(())
    }

    fn fetch_model(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        let url = self.artifact_url(run_id, artifact_path);
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| PipelineError::Tracking(format!("artifact download: {e}")))?;
        let bytes = check_status("artifact download", response)?
            .bytes()
            .map_err(|e| PipelineError::Tracking(format!("artifact download: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Pick the tracker variant from the explicit `enabled` flag.
pub fn tracker_from_config(config: &TrackingConfig) -> Result<Box<dyn ExperimentTracker>> {
    if config.enabled {
        Ok(Box::new(MlflowTracker::new(
            &config.tracking_uri,
            &config.experiment_id,
        )?))
    } else {
        Ok(Box::new(NoopTracker))
    }
}

/// Log and swallow a tracker failure.
pub fn best_effort<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Tracking step '{}' failed, continuing: {}", what, e);
            None
        }
    }
}
