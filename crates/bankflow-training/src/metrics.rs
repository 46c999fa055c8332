//! Evaluation metrics: weighted precision/recall/F1, confusion matrix,
//! rank-based ROC-AUC.

use ndarray::Array1;

/// Accuracy.
pub(crate) fn accuracy(predictions: &Array1<usize>, truth: &Array1<usize>) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(truth.iter())
        .filter(|(p, y)| p == y)
        .count();
    correct as f64 / truth.len() as f64
}

/// Support-weighted (precision, recall, F1). Per-class divisions by zero
/// contribute zero, matching the zero-division = 0 contract.
pub fn weighted_prf(
    predictions: &Array1<usize>,
    truth: &Array1<usize>,
    n_classes: usize,
) -> (f64, f64, f64) {
    let total = truth.len();
    if total == 0 {
        return (0.0, 0.0, 0.0);
    }

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut f1_sum = 0.0;

    for class in 0..n_classes {
        let tp = predictions
            .iter()
            .zip(truth.iter())
            .filter(|(p, y)| **p == class && **y == class)
            .count() as f64;
        let predicted = predictions.iter().filter(|p| **p == class).count() as f64;
        let support = truth.iter().filter(|y| **y == class).count() as f64;

        let precision = if predicted > 0.0 { tp / predicted } else { 0.0 };
        let recall = if support > 0.0 { tp / support } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let weight = support / total as f64;
        precision_sum += precision * weight;
        recall_sum += recall * weight;
        f1_sum += f1 * weight;
    }

    (precision_sum, recall_sum, f1_sum)
}

/// Row = actual class, column = predicted class.
pub fn confusion_matrix(
    predictions: &Array1<usize>,
    truth: &Array1<usize>,
    n_classes: usize,
) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0usize; n_classes]; n_classes];
    for (p, y) in predictions.iter().zip(truth.iter()) {
        if *y < n_classes && *p < n_classes {
            matrix[*y][*p] += 1;
        }
    }
    matrix
}

/// ROC-AUC via the rank-sum formulation; ties get average ranks.
/// Returns `None` when either class is absent.
pub fn roc_auc(scores: &[f64], truth: &Array1<usize>) -> Option<f64> {
    let positives = truth.iter().filter(|y| **y == 1).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut indexed: Vec<(f64, usize)> = scores.iter().copied().zip(truth.iter().copied()).collect();
    indexed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j + 1 < indexed.len() && (indexed[j + 1].0 - indexed[i].0).abs() < f64::EPSILON {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for item in &indexed[i..=j] {
            if item.1 == 1 {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accuracy() {
        let p = array![0usize, 1, 1, 0];
        let y = array![0usize, 1, 0, 0];
        assert!((accuracy(&p, &y) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_prf_perfect() {
        let p = array![0usize, 1, 2, 1, 0];
        let (precision, recall, f1) = weighted_prf(&p, &p, 3);
        assert!((precision - 1.0).abs() < 1e-9);
        assert!((recall - 1.0).abs() < 1e-9);
        assert!((f1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_prf_zero_division() {
        // Class 1 is never predicted; its precision contributes 0, not NaN.
        let p = array![0usize, 0, 0, 0];
        let y = array![0usize, 0, 1, 1];
        let (precision, recall, f1) = weighted_prf(&p, &y, 2);
        assert!(precision.is_finite() && recall.is_finite() && f1.is_finite());
        assert!((recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_confusion_matrix() {
        let p = array![0usize, 1, 1, 0];
        let y = array![0usize, 1, 0, 1];
        let m = confusion_matrix(&p, &y, 2);
        assert_eq!(m[0][0], 1); // actual 0 predicted 0
        assert_eq!(m[0][1], 1); // actual 0 predicted 1
        assert_eq!(m[1][0], 1);
        assert_eq!(m[1][1], 1);
    }

    #[test]
    fn test_roc_auc_perfect_ranking() {
        let scores = [0.1, 0.2, 0.8, 0.9];
        let y = array![0usize, 0, 1, 1];
        assert!((roc_auc(&scores, &y).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_roc_auc_random_ranking() {
        let scores = [0.5, 0.5, 0.5, 0.5];
        let y = array![0usize, 1, 0, 1];
        assert!((roc_auc(&scores, &y).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_roc_auc_single_class_none() {
        let scores = [0.5, 0.6];
        let y = array![1usize, 1];
        assert!(roc_auc(&scores, &y).is_none());
    }
}
