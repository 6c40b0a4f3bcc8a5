//! Univariate feature selection by ANOVA F-statistic

use tracing::debug;

/// F-statistic of each feature column against the class labels.
///
/// A column that is constant within every class scores `+inf` when the class
/// means differ and `NaN` when they do not.
pub fn f_classif(features: &[Vec<i64>], targets: &[u8]) -> Vec<f64> {
    let n = targets.len();
    let width = features.first().map_or(0, Vec::len);

    let mut class_sizes = [0usize; 2];
    for &t in targets {
        class_sizes[t as usize] += 1;
    }
    let groups = class_sizes.iter().filter(|&&c| c > 0).count();
    if groups < 2 || n <= groups {
        return vec![f64::NAN; width];
    }
    let df_between = (groups - 1) as f64;
    let df_within = (n - groups) as f64;

    (0..width)
        .map(|col| {
            let mut sums = [0f64; 2];
            for (row, &t) in features.iter().zip(targets) {
                sums[t as usize] += row[col] as f64;
            }
            let grand_mean = (sums[0] + sums[1]) / n as f64;
            let means = [0, 1].map(|c| {
                if class_sizes[c] == 0 {
                    0.0
                } else {
                    sums[c] / class_sizes[c] as f64
                }
            });

            let ss_between: f64 = (0..2)
                .map(|c| class_sizes[c] as f64 * (means[c] - grand_mean).powi(2))
                .sum();
            let ss_within: f64 = features
                .iter()
                .zip(targets)
                .map(|(row, &t)| (row[col] as f64 - means[t as usize]).powi(2))
                .sum();

            if ss_within == 0.0 {
                if ss_between > 0.0 {
                    f64::INFINITY
                } else {
                    f64::NAN
                }
            } else {
                (ss_between / df_between) / (ss_within / df_within)
            }
        })
        .collect()
}

/// Indices of the `k` best scores, returned in ascending column order.
///
/// `NaN` ranks below everything; equal scores keep the earlier column.
pub fn select_k_best(scores: &[f64], k: usize) -> Vec<usize> {
    let rank = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };

    let mut order: Vec<usize> = (0..scores.len()).collect();
    // sort_by is stable
    order.sort_by(|&a, &b| rank(scores[b]).total_cmp(&rank(scores[a])));
    order.truncate(k.min(scores.len()));
    order.sort_unstable();

    debug!(k, kept = order.len(), of = scores.len(), "Selected features");
    order
}
