//! CART classification tree builder
//!
//! Exact-greedy construction over integer features. At every node each
//! feature is tried at every distinct value but the largest, rows with
//! `x <= threshold` go left, and the split with the largest impurity
//! decrease wins. Equal gains resolve to the lower `(feature, threshold)`.

use std::collections::BTreeSet;

use mushroom_core::model::{Criterion, DecisionTree, TreeNode, TreeParams};
use mushroom_core::{PipelineError, Result};

use crate::deterministic::SplitTieBreaker;

/// Gains at or below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: i64,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn new(feature_idx: usize, threshold: i64, gain: f64) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, threshold),
        }
    }

    fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain + MIN_GAIN
            || ((self.gain - other.gain).abs() <= MIN_GAIN && self.tie_breaker < other.tie_breaker)
    }
}

/// Builds a binary classification tree from encoded rows.
pub struct CartBuilder<'a> {
    features: &'a [Vec<i64>],
    targets: &'a [u8],
    params: &'a TreeParams,
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        features: &'a [Vec<i64>],
        targets: &'a [u8],
        params: &'a TreeParams,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(PipelineError::Training("no training rows".to_string()));
        }
        if features.len() != targets.len() {
            return Err(PipelineError::Training(format!(
                "{} rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        let feature_count = features[0].len();
        if features.iter().any(|row| row.len() != feature_count) {
            return Err(PipelineError::Training("rows have differing widths".to_string()));
        }
        if let Some(bad) = targets.iter().find(|&&t| t > 1) {
            return Err(PipelineError::Training(format!("target {bad} is not binary")));
        }
        if params.min_samples_leaf == 0 {
            return Err(PipelineError::Training("min_samples_leaf must be at least 1".to_string()));
        }
        if params.min_samples_split < 2 {
            return Err(PipelineError::Training("min_samples_split must be at least 2".to_string()));
        }
        if params.max_depth == Some(0) {
            return Err(PipelineError::Training("max_depth must be at least 1".to_string()));
        }

        Ok(Self {
            features,
            targets,
            params,
            feature_count,
        })
    }

    pub fn build(&self) -> DecisionTree {
        let mut nodes = Vec::new();
        let indices: Vec<usize> = (0..self.targets.len()).collect();
        self.build_node(&indices, 0, &mut nodes);
        DecisionTree::new(nodes)
    }

    fn build_node(&self, indices: &[usize], depth: usize, nodes: &mut Vec<TreeNode>) -> i32 {
        let current = nodes.len() as i32;
        let counts = self.class_counts(indices);
        let majority = if counts[1] > counts[0] { 1 } else { 0 };

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        let pure = counts[0] == 0 || counts[1] == 0;
        if depth_reached || pure || indices.len() < self.params.min_samples_split {
            nodes.push(TreeNode::leaf(current, majority, counts));
            return current;
        }

        let Some(split) = self.find_best_split(indices, &counts) else {
            nodes.push(TreeNode::leaf(current, majority, counts));
            return current;
        };

        let (left, right) = self.partition(indices, split.feature_idx, split.threshold);

        // Reserve the slot so children land after their parent.
        nodes.push(TreeNode::internal(
            current,
            split.feature_idx as i32,
            split.threshold,
            -1,
            -1,
            counts,
        ));
        let left_idx = self.build_node(&left, depth + 1, nodes);
        let right_idx = self.build_node(&right, depth + 1, nodes);

        let node = &mut nodes[current as usize];
        node.left = left_idx;
        node.right = right_idx;
        current
    }

    fn find_best_split(&self, indices: &[usize], counts: &[u64; 2]) -> Option<SplitCandidate> {
        let criterion: Criterion = self.params.criterion;
        let n = indices.len() as f64;
        let parent_impurity = criterion.impurity(counts);
        let weight = n / self.targets.len() as f64;
        let mut best: Option<SplitCandidate> = None;

        for feature_idx in 0..self.feature_count {
            for threshold in self.thresholds(indices, feature_idx) {
                let (left, right) = self.partition(indices, feature_idx, threshold);
                if left.len() < self.params.min_samples_leaf
                    || right.len() < self.params.min_samples_leaf
                {
                    continue;
                }

                let left_imp = criterion.impurity(&self.class_counts(&left));
                let right_imp = criterion.impurity(&self.class_counts(&right));
                let child_impurity =
                    (left.len() as f64 * left_imp + right.len() as f64 * right_imp) / n;
                let gain = parent_impurity - child_impurity;

                if gain <= MIN_GAIN || weight * gain < self.params.min_impurity_decrease {
                    continue;
                }

                let candidate = SplitCandidate::new(feature_idx, threshold, gain);
                best = match best {
                    Some(current) if !candidate.beats(&current) => Some(current),
                    _ => Some(candidate),
                };
            }
        }

        best
    }

    /// Distinct values of a feature at this node, excluding the largest.
    fn thresholds(&self, indices: &[usize], feature_idx: usize) -> Vec<i64> {
        let values: BTreeSet<i64> = indices
            .iter()
            .map(|&i| self.features[i][feature_idx])
            .collect();
        let mut thresholds: Vec<i64> = values.into_iter().collect();
        thresholds.pop();
        thresholds
    }

    fn partition(
        &self,
        indices: &[usize],
        feature_idx: usize,
        threshold: i64,
    ) -> (Vec<usize>, Vec<usize>) {
        indices
            .iter()
            .copied()
            .partition(|&i| self.features[i][feature_idx] <= threshold)
    }

    fn class_counts(&self, indices: &[usize]) -> [u64; 2] {
        let mut counts = [0u64; 2];
        for &i in indices {
            counts[self.targets[i] as usize] += 1;
        }
        counts
    }
}
