//! Descriptive statistics computed on demand from a freshly loaded frame.

use serde_json::{json, Map, Value};

use crate::frame::{Column, Frame};
use crate::{mean, pearson, percentile, spearman, std_dev};

/// Per-column summary: counts, central tendency, spread, quartiles.
pub fn summary_stats(frame: &Frame) -> Value {
    let mut columns = Map::new();
    for (name, values) in frame.numeric_columns() {
        if values.is_empty() {
            continue;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        columns.insert(
            name.to_string(),
            json!({
                "count": values.len(),
                "mean": mean(&values),
                "std": std_dev(&values),
                "min": min,
                "q25": percentile(&values, 25.0),
                "median": percentile(&values, 50.0),
                "q75": percentile(&values, 75.0),
                "max": max,
            }),
        );
    }
    json!({
        "rows": frame.rows(),
        "cols": frame.cols(),
        "numeric_columns": columns.len(),
        "summary": columns,
    })
}

/// Pearson + Spearman matrices and the strongest absolute pairs.
pub fn correlations(frame: &Frame) -> Value {
    let numeric = frame.numeric_columns();
    let names: Vec<&str> = numeric.iter().map(|(n, _)| *n).collect();
    let n = names.len();

    let mut pearson_matrix = ndarray::Array2::<f64>::eye(n);
    let mut spearman_matrix = ndarray::Array2::<f64>::eye(n);
    let mut top_pairs = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let Some((x, y)) = frame.aligned_numeric(names[i], names[j]) else {
                continue;
            };
            let p = pearson(&x, &y);
            let s = spearman(&x, &y);
            pearson_matrix[[i, j]] = p;
            pearson_matrix[[j, i]] = p;
            spearman_matrix[[i, j]] = s;
            spearman_matrix[[j, i]] = s;
            top_pairs.push((names[i], names[j], p));
        }
    }

    top_pairs.sort_by(|a, b| {
        b.2.abs()
            .partial_cmp(&a.2.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top: Vec<Value> = top_pairs
        .iter()
        .take(10)
        .map(|(a, b, r)| json!({"a": a, "b": b, "pearson": r}))
        .collect();

    let to_rows = |m: &ndarray::Array2<f64>| -> Vec<Vec<f64>> {
        m.rows().into_iter().map(|r| r.to_vec()).collect()
    };

    json!({
        "columns": names,
        "pearson": to_rows(&pearson_matrix),
        "spearman": to_rows(&spearman_matrix),
        "top_pairs": top,
    })
}

/// Histogram per numeric column.
pub fn distributions(frame: &Frame) -> Value {
    distributions_with_bins(frame, 20)
}

pub(crate) fn distributions_with_bins(frame: &Frame, bins: usize) -> Value {
    let mut out = Map::new();
    for (name, values) in frame.numeric_columns() {
        if values.is_empty() {
            continue;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = if (max - min).abs() < f64::EPSILON {
            1.0
        } else {
            (max - min) / bins as f64
        };
        let mut counts = vec![0usize; bins];
        for v in &values {
            let idx = (((v - min) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        let edges: Vec<f64> = (0..=bins).map(|i| min + width * i as f64).collect();
        out.insert(name.to_string(), json!({"edges": edges, "counts": counts}));
    }
    json!({"bins": bins, "distributions": out})
}

/// IQR and z-score outliers per numeric column.
pub fn outliers(frame: &Frame) -> Value {
    let mut out = Map::new();
    for (name, values) in frame.numeric_columns() {
        if values.len() < 4 {
            continue;
        }
        let q1 = percentile(&values, 25.0);
        let q3 = percentile(&values, 75.0);
        let iqr = q3 - q1;
        let lo = q1 - 1.5 * iqr;
        let hi = q3 + 1.5 * iqr;
        let iqr_outliers = values.iter().filter(|v| **v < lo || **v > hi).count();

        let m = mean(&values);
        let s = std_dev(&values);
        let z_outliers = if s > f64::EPSILON {
            values.iter().filter(|v| ((**v - m) / s).abs() > 3.0).count()
        } else {
            0
        };

        out.insert(
            name.to_string(),
            json!({
                "iqr_outliers": iqr_outliers,
                "z_outliers": z_outliers,
                "lower_bound": lo,
                "upper_bound": hi,
                "pct": iqr_outliers as f64 / values.len() as f64 * 100.0,
            }),
        );
    }
    json!({"outliers": out})
}

/// Class counts and imbalance for a target column, with rebalancing
/// suggestions for skewed targets.
pub fn class_distribution(frame: &Frame, target_column: Option<&str>) -> Value {
    let Some(target) = target_column else {
        return json!({"message": "No target column supplied"});
    };
    let Some(column) = frame.column(target) else {
        return json!({"message": format!("Column '{target}' not found")});
    };

    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut bump = |label: String| {
        match counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, c)) => *c += 1,
            None => counts.push((label, 1)),
        }
    };
    match column {
        Column::Numeric { values, .. } => {
            for v in values.iter().flatten() {
                bump(format!("{v}"));
            }
        }
        Column::Text { values, .. } => {
            for v in values.iter().flatten() {
                bump(v.clone());
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let total: usize = counts.iter().map(|(_, c)| c).sum();
    let imbalance = match (counts.first(), counts.last()) {
        (Some((_, majority)), Some((_, minority))) if *minority > 0 && counts.len() > 1 => {
            *majority as f64 / *minority as f64
        }
        _ => 1.0,
    };

    let mut techniques = Vec::new();
    if imbalance > 10.0 {
        techniques.push(json!({"method": "Class Weights", "description": "Assign higher weights to the minority class during training"}));
        techniques.push(json!({"method": "Random Undersampling", "description": "Reduce majority-class samples to balance the dataset"}));
        techniques.push(json!({"method": "Threshold Tuning", "description": "Adjust the decision threshold toward minority-class recall"}));
    } else if imbalance > 3.0 {
        techniques.push(json!({"method": "Class Weights", "description": "Use balanced class weights in training"}));
    }

    json!({
        "target": target,
        "classes": counts.iter().map(|(l, c)| json!({
            "label": l,
            "count": c,
            "pct": *c as f64 / total.max(1) as f64 * 100.0,
        })).collect::<Vec<_>>(),
        "n_classes": counts.len(),
        "imbalance_ratio": imbalance,
        "rebalancing": techniques,
    })
}

/// Feature-engineering suggestions: log transforms for skewed columns,
/// ratios between correlated pairs, encodings for low-cardinality text.
pub fn feature_engineering(frame: &Frame, target_column: Option<&str>) -> Value {
    let mut suggestions = Vec::new();

    for (name, values) in frame.numeric_columns() {
        if Some(name) == target_column || values.len() < 10 {
            continue;
        }
        let m = mean(&values);
        let med = percentile(&values, 50.0);
        let s = std_dev(&values);
        // Mean far above median on a positive column suggests right skew.
        if s > f64::EPSILON && m > 0.0 && med > 0.0 && m / med > 2.0 {
            suggestions.push(json!({
                "feature": format!("log_{name}"),
                "kind": "log_transform",
                "source": [name],
                "reason": "Right-skewed distribution (mean well above median)",
            }));
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        if max - min > 1000.0 {
            suggestions.push(json!({
                "feature": format!("{name}_scaled"),
                "kind": "standardize",
                "source": [name],
                "reason": "Wide value range; standardize before linear models",
            }));
        }
    }

    let numeric = frame.numeric_columns();
    for i in 0..numeric.len() {
        for j in (i + 1)..numeric.len() {
            let (a, _) = &numeric[i];
            let (b, _) = &numeric[j];
            if Some(*a) == target_column || Some(*b) == target_column {
                continue;
            }
            if let Some((x, y)) = frame.aligned_numeric(a, b) {
                let r = pearson(&x, &y);
                if r.abs() > 0.6 && suggestions.len() < 25 {
                    suggestions.push(json!({
                        "feature": format!("{a}_to_{b}_ratio"),
                        "kind": "ratio",
                        "source": [a, b],
                        "reason": format!("Correlated pair (r = {r:.2}); the ratio can separate the trend"),
                    }));
                }
            }
        }
    }

    for (name, values) in frame.text_columns() {
        let unique: std::collections::HashSet<_> = values.iter().collect();
        if !values.is_empty() && unique.len() <= 20 {
            suggestions.push(json!({
                "feature": format!("{name}_encoded"),
                "kind": "one_hot",
                "source": [name],
                "reason": format!("Categorical with {} levels", unique.len()),
            }));
        }
    }

    json!({
        "n_suggestions": suggestions.len(),
        "suggestions": suggestions,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_frame() -> (tempfile::TempDir, Frame) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "amount,balance,label,region").unwrap();
        for i in 0..40 {
            let label = i32::from(i % 8 == 0);
            writeln!(
                f,
                "{},{},{},{}",
                10.0 + i as f64,
                2.0 * (10.0 + i as f64) + 1.0,
                label,
                if i % 2 == 0 { "north" } else { "south" }
            )
            .unwrap();
        }
        let frame = Frame::from_csv_path(&path, 10_000).unwrap();
        (dir, frame)
    }

    #[test]
    fn test_summary_stats() {
        let (_d, frame) = sample_frame();
        let out = summary_stats(&frame);
        assert_eq!(out["rows"], 40);
        assert!(out["summary"]["amount"]["mean"].as_f64().unwrap() > 10.0);
        assert!(out["summary"]["amount"]["std"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_correlations_finds_linear_pair() {
        let (_d, frame) = sample_frame();
        let out = correlations(&frame);
        let top = out["top_pairs"].as_array().unwrap();
        assert!(!top.is_empty());
        // amount and balance are exactly linear.
        let best = &top[0];
        let pair = (best["a"].as_str().unwrap(), best["b"].as_str().unwrap());
        assert!(pair == ("amount", "balance") || pair == ("balance", "amount"));
        assert!((best["pearson"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_distributions_counts_sum_to_rows() {
        let (_d, frame) = sample_frame();
        let out = distributions(&frame);
        let counts = out["distributions"]["amount"]["counts"].as_array().unwrap();
        let total: u64 = counts.iter().map(|c| c.as_u64().unwrap()).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_class_distribution_imbalance() {
        let (_d, frame) = sample_frame();
        let out = class_distribution(&frame, Some("label"));
        assert_eq!(out["n_classes"], 2);
        assert!(out["imbalance_ratio"].as_f64().unwrap() > 3.0);
        assert!(!out["rebalancing"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_class_distribution_missing_column() {
        let (_d, frame) = sample_frame();
        let out = class_distribution(&frame, Some("nope"));
        assert!(out["message"].as_str().unwrap().contains("not found"));
    }

    #[test]
    fn test_feature_engineering_suggests_encoding() {
        let (_d, frame) = sample_frame();
        let out = feature_engineering(&frame, Some("label"));
        let suggestions = out["suggestions"].as_array().unwrap();
        assert!(suggestions
            .iter()
            .any(|s| s["kind"] == "one_hot" && s["feature"] == "region_encoded"));
        assert!(suggestions.iter().any(|s| s["kind"] == "ratio"));
    }

    #[test]
    fn test_outliers_on_spiked_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "v").unwrap();
        for _ in 0..50 {
            writeln!(f, "10").unwrap();
        }
        writeln!(f, "10000").unwrap();
        let frame = Frame::from_csv_path(&path, 1000).unwrap();
        let out = outliers(&frame);
        assert!(out["outliers"]["v"]["iqr_outliers"].as_u64().unwrap() >= 1);
    }
}
