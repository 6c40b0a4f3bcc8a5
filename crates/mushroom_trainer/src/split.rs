//! Stratified train/test split

use mushroom_core::{PipelineError, Result};

use crate::deterministic::LcgRng;

/// Row indices of each side of a split, both sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split rows so each class keeps its share in both partitions.
///
/// The test side gets `ceil(test_size * n)` rows. Each class contributes the
/// floor of its proportional share, and leftover slots go to the classes with
/// the largest remainders. Rows are drawn from a seeded shuffle of each class.
pub fn stratified_split(targets: &[u8], test_size: f64, seed: u64) -> Result<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PipelineError::Training(format!(
            "test_size must lie in (0, 1), got {test_size}"
        )));
    }

    let n = targets.len();
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); 2];
    for (i, &t) in targets.iter().enumerate() {
        let class = by_class.get_mut(t as usize).ok_or_else(|| {
            PipelineError::Training(format!("target {t} is not a binary label"))
        })?;
        class.push(i);
    }
    by_class.retain(|rows| !rows.is_empty());
    let n_classes = by_class.len();

    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test < n_classes || n_train < n_classes {
        return Err(PipelineError::Training(format!(
            "cannot stratify {n} rows over {n_classes} classes with test_size {test_size}"
        )));
    }

    // Floor shares, then largest remainders; ties go to the lower class.
    let exact: Vec<f64> = by_class
        .iter()
        .map(|rows| n_test as f64 * rows.len() as f64 / n as f64)
        .collect();
    let mut alloc: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut leftover = n_test - alloc.iter().sum::<usize>();
    let mut by_remainder: Vec<usize> = (0..n_classes).collect();
    let remainder = |c: usize| exact[c] - exact[c].floor();
    by_remainder.sort_by(|&a, &b| remainder(b).total_cmp(&remainder(a)));
    for &c in by_remainder.iter().cycle() {
        if leftover == 0 {
            break;
        }
        if alloc[c] < by_class[c].len() {
            alloc[c] += 1;
            leftover -= 1;
        }
    }

    let mut rng = LcgRng::new(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (rows, take) in by_class.iter_mut().zip(alloc) {
        rng.shuffle(rows);
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    Ok(SplitIndices { train, test })
}
