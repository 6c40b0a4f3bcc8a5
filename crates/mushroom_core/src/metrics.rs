//! Binary classification metrics
//!
//! Class 1 (poisonous) is the positive class. A ratio whose denominator is
//! zero is reported as 0.0.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

/// Scores persisted by evaluation and logged to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl MetricsRecord {
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(PipelineError::Evaluation(format!(
                "{} labels but {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(PipelineError::Evaluation("no rows to score".to_string()));
        }

        let (mut tp, mut fp, mut fn_, mut correct) = (0u64, 0u64, 0u64, 0u64);
        for (&truth, &pred) in y_true.iter().zip(y_pred) {
            if truth == pred {
                correct += 1;
            }
            match (truth, pred) {
                (1, 1) => tp += 1,
                (0, 1) => fp += 1,
                (1, 0) => fn_ += 1,
                _ => {}
            }
        }

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Ok(Self {
            accuracy: ratio(correct, y_true.len() as u64),
            precision,
            recall,
            f1_score,
        })
    }

    /// Metric name to value, as sent to the tracker.
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("precision".to_string(), self.precision),
            ("recall".to_string(), self.recall),
            ("f1_score".to_string(), self.f1_score),
        ])
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
