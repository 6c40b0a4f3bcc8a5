//! Decision-tree classifier artifact
//!
//! The tree is stored as a flat node list in preorder (node 0 is the root).
//! Internal nodes send a row left when `row[feature_idx] <= threshold`.
//! The persisted artifact bundles the tree with the `FeatureSchema` it was
//! fit on, the hyperparameters, and a BLAKE3 hash over everything except the
//! creation timestamp.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoder::{FeatureMatrix, FeatureSchema};
use crate::errors::{PipelineError, Result};
use crate::serialization::{hash_canonical_hex, to_canonical_json_pretty};

/// Artifact format version
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Split quality measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    #[default]
    Gini,
    Entropy,
    LogLoss,
}

impl Criterion {
    /// Impurity of a node with the given per-class counts.
    pub fn impurity(&self, counts: &[u64; 2]) -> f64 {
        let total = (counts[0] + counts[1]) as f64;
        if total == 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => {
                1.0 - counts
                    .iter()
                    .map(|&c| {
                        let p = c as f64 / total;
                        p * p
                    })
                    .sum::<f64>()
            }
            Criterion::Entropy | Criterion::LogLoss => counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / total;
                    -p * p.log2()
                })
                .sum(),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Criterion::Gini => "gini",
            Criterion::Entropy => "entropy",
            Criterion::LogLoss => "log_loss",
        })
    }
}

/// Hyperparameters read from the `DecisionTreeClassifier` params section.
///
/// Keys the builder does not understand are kept in `extra` so they are
/// recorded with the model and reported at startup instead of rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub min_impurity_decrease: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_impurity_decrease: 0.0,
            extra: BTreeMap::new(),
        }
    }
}

/// A tree node, internal or leaf.
///
/// Leaves carry `feature_idx == -1`, children `-1`, and `leaf = Some(class)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: i32,
    pub left: i32,
    pub right: i32,
    pub feature_idx: i32,
    pub threshold: i64,
    /// Training rows of class 0 and class 1 that reached this node
    pub class_counts: [u64; 2],
    pub leaf: Option<u8>,
}

impl TreeNode {
    pub fn internal(
        id: i32,
        feature_idx: i32,
        threshold: i64,
        left: i32,
        right: i32,
        class_counts: [u64; 2],
    ) -> Self {
        Self {
            id,
            left,
            right,
            feature_idx,
            threshold,
            class_counts,
            leaf: None,
        }
    }

    pub fn leaf(id: i32, class: u8, class_counts: [u64; 2]) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0,
            class_counts,
            leaf: Some(class),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

/// Fitted binary decision tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Class for one row, or `None` if the walk leaves the tree.
    pub fn predict_row(&self, row: &[i64]) -> Option<u8> {
        let mut idx = 0usize;
        // A valid tree reaches a leaf in at most `nodes.len()` steps.
        for _ in 0..=self.nodes.len() {
            let node = self.nodes.get(idx)?;
            if let Some(class) = node.leaf {
                return Some(class);
            }
            let value = *row.get(usize::try_from(node.feature_idx).ok()?)?;
            let next = if value <= node.threshold {
                node.left
            } else {
                node.right
            };
            idx = usize::try_from(next).ok()?;
        }
        None
    }

    /// Check structure against a feature count.
    pub fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        let n = self.nodes.len() as i32;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                if !matches!(node.leaf, Some(0) | Some(1)) {
                    return Err(format!("node {i}: leaf class must be 0 or 1"));
                }
                continue;
            }
            if node.feature_idx < 0 || node.feature_idx as usize >= n_features {
                return Err(format!(
                    "node {i}: feature index {} outside 0..{n_features}",
                    node.feature_idx
                ));
            }
            // Preorder layout: children always follow their parent.
            for child in [node.left, node.right] {
                if child <= i as i32 || child >= n {
                    return Err(format!("node {i}: child index {child} is invalid"));
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() => {
                    1 + walk(nodes, node.left as usize).max(walk(nodes, node.right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }
}

/// Provenance recorded alongside the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub created_at: DateTime<Utc>,
    pub crate_version: String,
    pub n_train_samples: usize,
    /// BLAKE3 of the canonical artifact body
    pub model_hash: String,
}

/// Hashed portion of the artifact
#[derive(Serialize)]
struct ArtifactBody<'a> {
    version: u32,
    schema: &'a FeatureSchema,
    params: &'a TreeParams,
    tree: &'a DecisionTree,
    n_train_samples: usize,
}

/// Persisted classifier: tree plus the schema it was fit on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub version: u32,
    pub schema: FeatureSchema,
    pub params: TreeParams,
    pub tree: DecisionTree,
    pub metadata: ModelMetadata,
}

impl ClassifierArtifact {
    pub fn new(
        schema: FeatureSchema,
        params: TreeParams,
        tree: DecisionTree,
        n_train_samples: usize,
    ) -> Result<Self> {
        tree.validate(schema.len())
            .map_err(|e| PipelineError::Training(format!("invalid tree: {e}")))?;

        let mut artifact = Self {
            version: MODEL_FORMAT_VERSION,
            schema,
            params,
            tree,
            metadata: ModelMetadata {
                created_at: Utc::now(),
                crate_version: crate::VERSION.to_string(),
                n_train_samples,
                model_hash: String::new(),
            },
        };
        artifact.metadata.model_hash = artifact.calculate_hash()?;
        Ok(artifact)
    }

    /// Hash of everything but the timestamp and the hash itself.
    pub fn calculate_hash(&self) -> Result<String> {
        hash_canonical_hex(&ArtifactBody {
            version: self.version,
            schema: &self.schema,
            params: &self.params,
            tree: &self.tree,
            n_train_samples: self.metadata.n_train_samples,
        })
    }

    pub fn verify(&self) -> Result<()> {
        if self.version != MODEL_FORMAT_VERSION {
            return Err(PipelineError::Serialization(format!(
                "unsupported model format version {}",
                self.version
            )));
        }
        self.tree
            .validate(self.schema.len())
            .map_err(|e| PipelineError::Serialization(format!("invalid tree: {e}")))?;
        let actual = self.calculate_hash()?;
        if actual != self.metadata.model_hash {
            return Err(PipelineError::Serialization(format!(
                "model hash mismatch: recorded {}, computed {}",
                self.metadata.model_hash, actual
            )));
        }
        Ok(())
    }

    /// Classify every row of a matrix built against this model's schema.
    pub fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<u8>> {
        let expected = self.schema.fingerprint();
        if matrix.fingerprint() != expected {
            return Err(PipelineError::SchemaMismatch {
                expected,
                found: matrix.fingerprint().to_string(),
            });
        }
        matrix
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| {
                self.tree.predict_row(row).ok_or_else(|| {
                    PipelineError::Serialization(format!("row {i} fell off the tree"))
                })
            })
            .collect()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_json_pretty(self)
    }

    /// Parse and verify an artifact.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let artifact: Self = serde_json::from_slice(bytes)?;
        artifact.verify()?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodedFrame;

    /// odor_n <= 0 → poisonous, else edible
    fn stump() -> ClassifierArtifact {
        let schema = FeatureSchema::new(["odor_f", "odor_n"]).unwrap();
        let tree = DecisionTree::new(vec![
            TreeNode::internal(0, 1, 0, 1, 2, [3, 3]),
            TreeNode::leaf(1, 1, [0, 3]),
            TreeNode::leaf(2, 0, [3, 0]),
        ]);
        ClassifierArtifact::new(schema, TreeParams::default(), tree, 6).unwrap()
    }

    #[test]
    fn impurity_values() {
        assert_eq!(Criterion::Gini.impurity(&[5, 0]), 0.0);
        assert!((Criterion::Gini.impurity(&[2, 2]) - 0.5).abs() < 1e-12);
        assert!((Criterion::Entropy.impurity(&[2, 2]) - 1.0).abs() < 1e-12);
        assert_eq!(
            Criterion::LogLoss.impurity(&[1, 3]),
            Criterion::Entropy.impurity(&[1, 3])
        );
        assert_eq!(Criterion::Gini.impurity(&[0, 0]), 0.0);
    }

    #[test]
    fn predicts_through_schema() {
        let model = stump();
        let frame = EncodedFrame::new(
            vec!["odor_n".into(), "extra".into()],
            vec![vec![1, 5], vec![0, 5]],
        );
        let matrix = model.schema.reconcile(&frame);
        assert_eq!(model.predict(&matrix).unwrap(), vec![0, 1]);
    }

    #[test]
    fn foreign_schema_is_rejected() {
        let model = stump();
        let other = FeatureSchema::new(["odor_n", "odor_f"]).unwrap();
        let matrix = other.reconcile(&EncodedFrame::new(vec!["odor_n".into()], vec![vec![1]]));
        assert!(matches!(
            model.predict(&matrix),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn json_round_trip_verifies_hash() {
        let model = stump();
        let bytes = model.to_json_bytes().unwrap();
        let back = ClassifierArtifact::from_json_slice(&bytes).unwrap();
        assert_eq!(back, model);

        let mut tampered = model.clone();
        tampered.tree.nodes[1].leaf = Some(0);
        let bytes = tampered.to_json_bytes().unwrap();
        assert!(ClassifierArtifact::from_json_slice(&bytes).is_err());
    }

    #[test]
    fn hash_ignores_timestamp() {
        let a = stump();
        let mut b = a.clone();
        b.metadata.created_at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_eq!(a.calculate_hash().unwrap(), b.calculate_hash().unwrap());
    }

    #[test]
    fn validate_catches_bad_children() {
        let tree = DecisionTree::new(vec![TreeNode::internal(0, 0, 0, 0, 5, [1, 1])]);
        assert!(tree.validate(1).is_err());
        assert!(DecisionTree::new(vec![]).validate(1).is_err());
    }

    #[test]
    fn depth_and_leaves() {
        let model = stump();
        assert_eq!(model.tree.depth(), 1);
        assert_eq!(model.tree.leaf_count(), 2);
    }

    #[test]
    fn params_keep_unknown_keys() {
        let params: TreeParams =
            serde_yaml::from_str("criterion: log_loss\nmax_leaf_nodes: 8\n").unwrap();
        assert_eq!(params.criterion, Criterion::LogLoss);
        assert_eq!(params.min_samples_split, 2);
        assert!(params.extra.contains_key("max_leaf_nodes"));
    }
}
