//! Evaluation metrics and result recording
//!
//! Computes per-tile predictions rolled up to slide and patient level, with
//! the metric family chosen by model type: AUROC for categorical outcomes,
//! R² for linear outcomes, and the concordance index for survival models.
//! Results are merged into a persistent log keyed by run label.

mod results_log;
mod rollup;

pub use results_log::{read_results_log, update_results_log};
pub use rollup::{LevelMetrics, TilePredictions};

/// Area under the ROC curve via the rank-sum statistic.
///
/// Returns `None` when only one class is present.
pub fn auroc(scores: &[f32], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    // Rank scores ascending, sharing ranks across ties
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));
    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let shared = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = shared;
        }
        i = j + 1;
    }
    let rank_sum: f64 =
        labels.iter().zip(&ranks).filter(|(&l, _)| l).map(|(_, &r)| r).sum();
    let p = positives as f64;
    let n = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Macro-averaged one-vs-rest AUROC over class probability columns
pub fn macro_auroc(probs: &ndarray::Array2<f32>, labels: &[usize]) -> Option<f64> {
    let mut sum = 0.0;
    let mut counted = 0;
    for class in 0..probs.ncols() {
        let scores: Vec<f32> = probs.column(class).to_vec();
        let binary: Vec<bool> = labels.iter().map(|&l| l == class).collect();
        if let Some(value) = auroc(&scores, &binary) {
            sum += value;
            counted += 1;
        }
    }
    if counted == 0 {
        None
    } else {
        Some(sum / counted as f64)
    }
}

/// Coefficient of determination
pub fn r_squared(preds: &[f32], targets: &[f32]) -> Option<f64> {
    if preds.len() != targets.len() || preds.is_empty() {
        return None;
    }
    let mean = targets.iter().map(|&t| t as f64).sum::<f64>() / targets.len() as f64;
    let ss_tot: f64 = targets.iter().map(|&t| (t as f64 - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return None;
    }
    let ss_res: f64 =
        preds.iter().zip(targets).map(|(&p, &t)| (t as f64 - p as f64).powi(2)).sum();
    Some(1.0 - ss_res / ss_tot)
}

/// Concordance index over (risk, time-to-event, event-indicator) triples.
///
/// A pair is comparable when the earlier time carries an observed event;
/// concordant when the earlier-event sample has the higher predicted risk.
/// Risk ties count half. Returns `None` without comparable pairs.
pub fn concordance_index(risk: &[f32], time: &[f32], event: &[f32]) -> Option<f64> {
    let n = risk.len();
    let mut concordant = 0.0f64;
    let mut comparable = 0usize;
    for i in 0..n {
        if event[i] <= 0.0 {
            continue;
        }
        for j in 0..n {
            if i == j || time[j] <= time[i] {
                continue;
            }
            comparable += 1;
            if risk[i] > risk[j] {
                concordant += 1.0;
            } else if risk[i] == risk[j] {
                concordant += 0.5;
            }
        }
    }
    if comparable == 0 {
        None
    } else {
        Some(concordant / comparable as f64)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// AUROC is invariant under any strictly monotone score transform
        #[test]
        fn auroc_rank_invariance(
            scores in proptest::collection::vec(-10.0f32..10.0, 4..40),
            flips in proptest::collection::vec(any::<bool>(), 4..40),
        ) {
            let n = scores.len().min(flips.len());
            let scores = &scores[..n];
            let labels = &flips[..n];
            prop_assume!(labels.iter().any(|&l| l) && labels.iter().any(|&l| !l));
            let base = auroc(scores, labels).unwrap();
            let transformed: Vec<f32> = scores.iter().map(|&s| s.exp()).collect();
            let shifted = auroc(&transformed, labels).unwrap();
            prop_assert!((base - shifted).abs() < 1e-6);
        }

        /// Concordance stays within [0, 1]
        #[test]
        fn concordance_bounds(
            risk in proptest::collection::vec(-5.0f32..5.0, 3..20),
        ) {
            let n = risk.len();
            let time: Vec<f32> = (0..n).map(|i| i as f32 + 1.0).collect();
            let event: Vec<f32> = (0..n).map(|i| (i % 2) as f32).collect();
            if let Some(c) = concordance_index(&risk, &time, &event) {
                prop_assert!((0.0..=1.0).contains(&c));
            }
        }
    }
}
