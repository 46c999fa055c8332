//! Bank-grade analyses: stability (PSI/CSI), leakage, calibration,
//! fairness, and cost/threshold sensitivity.

use serde_json::{json, Map, Value};

use crate::frame::{Column, Frame};
use crate::{mean, pearson, percentile};

const PSI_BINS: usize = 10;

/// Population Stability Index between two samples over decile bins of the
/// reference sample.
pub(crate) fn psi(reference: &[f64], current: &[f64]) -> f64 {
    if reference.len() < PSI_BINS || current.is_empty() {
        return 0.0;
    }
    let edges: Vec<f64> = (1..PSI_BINS)
        .map(|i| percentile(reference, i as f64 * 100.0 / PSI_BINS as f64))
        .collect();

    let bucket = |v: f64| edges.iter().take_while(|e| v > **e).count();

    let mut ref_counts = vec![0usize; PSI_BINS];
    let mut cur_counts = vec![0usize; PSI_BINS];
    for v in reference {
        ref_counts[bucket(*v)] += 1;
    }
    for v in current {
        cur_counts[bucket(*v)] += 1;
    }

    let mut total = 0.0;
    for (r, c) in ref_counts.iter().zip(&cur_counts) {
        // Floor at a small share so empty bins don't blow up the log.
        let pr = (*r as f64 / reference.len() as f64).max(1e-4);
        let pc = (*c as f64 / current.len() as f64).max(1e-4);
        total += (pc - pr) * (pc / pr).ln();
    }
    total
}

/// PSI/CSI per numeric feature between the first and second half of the
/// dataset (a proxy for train-time vs recent data).
pub fn stability_analysis(frame: &Frame, target_column: Option<&str>) -> Value {
    let mut features = Map::new();
    let mut flagged = Vec::new();

    for (name, values) in frame.numeric_columns() {
        if values.len() < 2 * PSI_BINS {
            continue;
        }
        let mid = values.len() / 2;
        let score = psi(&values[..mid], &values[mid..]);
        let status = if score >= 0.25 {
            "shifted"
        } else if score >= 0.1 {
            "drifting"
        } else {
            "stable"
        };
        if status != "stable" {
            flagged.push(name.to_string());
        }
        let kind = if Some(name) == target_column { "psi" } else { "csi" };
        features.insert(
            name.to_string(),
            json!({"index": score, "kind": kind, "status": status}),
        );
    }

    json!({
        "features": features,
        "flagged": flagged,
        "thresholds": {"drifting": 0.1, "shifted": 0.25},
    })
}

/// Leakage suspects: features nearly perfectly correlated with the target,
/// duplicated columns, and suspicious name patterns.
pub fn leakage_analysis(frame: &Frame, target_column: Option<&str>) -> Value {
    let mut suspects = Vec::new();

    if let Some(target) = target_column {
        for (name, _) in frame.numeric_columns() {
            if name == target {
                continue;
            }
            if let Some((x, y)) = frame.aligned_numeric(name, target) {
                let r = pearson(&x, &y).abs();
                if r > 0.95 {
                    suspects.push(json!({
                        "feature": name,
                        "kind": "target_correlation",
                        "correlation": r,
                        "detail": "Near-perfect correlation with the target; likely post-outcome information",
                    }));
                }
            }
        }
    }

    let numeric = frame.numeric_columns();
    for i in 0..numeric.len() {
        for j in (i + 1)..numeric.len() {
            if let Some((x, y)) = frame.aligned_numeric(numeric[i].0, numeric[j].0) {
                if !x.is_empty() && pearson(&x, &y).abs() > 0.999 {
                    suspects.push(json!({
                        "feature": numeric[j].0,
                        "kind": "duplicate_column",
                        "detail": format!("Duplicates '{}'", numeric[i].0),
                    }));
                }
            }
        }
    }

    for column in frame.columns() {
        let lower = column.name().to_ascii_lowercase();
        for marker in ["outcome", "result", "decision", "chargeback", "resolved"] {
            if lower.contains(marker) && Some(column.name()) != target_column {
                suspects.push(json!({
                    "feature": column.name(),
                    "kind": "name_pattern",
                    "detail": format!("Column name contains '{marker}'; verify it predates the decision point"),
                }));
            }
        }
    }

    json!({
        "n_suspects": suspects.len(),
        "suspects": suspects,
    })
}

/// Calibration of a [0, 1] score column against a binary target.
pub fn calibration_analysis(frame: &Frame, target_column: Option<&str>) -> Value {
    let Some(target) = target_column else {
        return json!({"message": "No target column supplied"});
    };
    let Some(score_column) = find_score_column(frame, target) else {
        return json!({"message": "No score-like column in [0, 1] found to calibrate"});
    };
    let Some((scores, labels)) = frame.aligned_numeric(&score_column, target) else {
        return json!({"message": "Target is not numeric"});
    };

    let bins = 10usize;
    let mut bin_stats = Vec::new();
    let mut ece = 0.0;
    for b in 0..bins {
        let lo = b as f64 / bins as f64;
        let hi = (b + 1) as f64 / bins as f64;
        let members: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s >= lo && (**s < hi || (b == bins - 1 && **s <= hi)))
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }
        let mean_score = mean(&members.iter().map(|i| scores[*i]).collect::<Vec<_>>());
        let actual_rate = mean(&members.iter().map(|i| labels[*i]).collect::<Vec<_>>());
        ece += (members.len() as f64 / scores.len() as f64) * (mean_score - actual_rate).abs();
        bin_stats.push(json!({
            "bin": format!("[{lo:.1}, {hi:.1})"),
            "count": members.len(),
            "mean_score": mean_score,
            "actual_rate": actual_rate,
        }));
    }

    json!({
        "score_column": score_column,
        "target": target,
        "bins": bin_stats,
        "expected_calibration_error": ece,
        "well_calibrated": ece < 0.1,
    })
}

/// Group outcome rates and disparate-impact ratios over low-cardinality
/// text columns.
pub fn fairness_analysis(frame: &Frame, target_column: Option<&str>) -> Value {
    let Some(target) = target_column else {
        return json!({"message": "No target column supplied"});
    };
    let Some(Column::Numeric { values: target_values, .. }) = frame.column(target) else {
        return json!({"message": format!("Target '{target}' is not numeric")});
    };

    let mut groups_out = Map::new();
    for column in frame.columns() {
        let Column::Text { name, values } = column else {
            continue;
        };
        let distinct: std::collections::HashSet<&String> = values.iter().flatten().collect();
        if distinct.is_empty() || distinct.len() > 10 {
            continue;
        }

        let mut rates = Vec::new();
        for group in &distinct {
            let outcomes: Vec<f64> = values
                .iter()
                .zip(target_values)
                .filter_map(|(g, t)| match (g, t) {
                    (Some(g), Some(t)) if g == *group => Some(*t),
                    _ => None,
                })
                .collect();
            if outcomes.len() < 5 {
                continue;
            }
            rates.push(json!({
                "group": group,
                "count": outcomes.len(),
                "positive_rate": mean(&outcomes),
            }));
        }
        if rates.len() < 2 {
            continue;
        }

        let positive_rates: Vec<f64> = rates
            .iter()
            .filter_map(|r| r["positive_rate"].as_f64())
            .collect();
        let max_rate = positive_rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_rate = positive_rates.iter().copied().fold(f64::INFINITY, f64::min);
        let disparate_impact = if max_rate > f64::EPSILON {
            min_rate / max_rate
        } else {
            1.0
        };

        groups_out.insert(
            name.clone(),
            json!({
                "groups": rates,
                "disparate_impact_ratio": disparate_impact,
                // Four-fifths rule.
                "passes_four_fifths": disparate_impact >= 0.8,
            }),
        );
    }

    json!({
        "target": target,
        "attributes": groups_out,
    })
}

/// Cost curve over decision thresholds for a score column vs a binary
/// target. False negatives priced 5× false positives by default.
pub fn cost_threshold_analysis(frame: &Frame, target_column: Option<&str>) -> Value {
    let Some(target) = target_column else {
        return json!({"message": "No target column supplied"});
    };
    let Some(score_column) = find_score_column(frame, target) else {
        return json!({"message": "No score-like column in [0, 1] found"});
    };
    let Some((scores, labels)) = frame.aligned_numeric(&score_column, target) else {
        return json!({"message": "Target is not numeric"});
    };

    let fp_cost = 1.0;
    let fn_cost = 5.0;
    let mut curve = Vec::new();
    let mut best = (0.5, f64::INFINITY);

    for t in 0..=20 {
        let threshold = t as f64 / 20.0;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut tp = 0usize;
        for (s, l) in scores.iter().zip(&labels) {
            let predicted = *s >= threshold;
            let actual = *l >= 0.5;
            match (predicted, actual) {
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (true, true) => tp += 1,
                _ => {}
            }
        }
        let cost = fp as f64 * fp_cost + fn_ as f64 * fn_cost;
        if cost < best.1 {
            best = (threshold, cost);
        }
        curve.push(json!({
            "threshold": threshold,
            "false_positives": fp,
            "false_negatives": fn_,
            "true_positives": tp,
            "cost": cost,
        }));
    }

    json!({
        "score_column": score_column,
        "fp_cost": fp_cost,
        "fn_cost": fn_cost,
        "curve": curve,
        "optimal_threshold": best.0,
        "optimal_cost": best.1,
    })
}

/// A numeric column (other than the target) whose values all fall in
/// [0, 1]: the conventional shape of a model score.
fn find_score_column(frame: &Frame, target: &str) -> Option<String> {
    for (name, values) in frame.numeric_columns() {
        if name == target || values.is_empty() {
            continue;
        }
        let in_unit = values.iter().all(|v| (0.0..=1.0).contains(v));
        let distinct: std::collections::HashSet<u64> = values.iter().map(|v| v.to_bits()).collect();
        if in_unit && distinct.len() > 2 {
            return Some(name.to_string());
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scored_frame() -> (tempfile::TempDir, Frame) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scored.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "score,label,segment").unwrap();
        for i in 0..100 {
            // Scores roughly track labels; segment alternates.
            let label = i32::from(i % 4 == 0);
            let score = if label == 1 { 0.7 + (i % 3) as f64 * 0.1 } else { 0.1 + (i % 5) as f64 * 0.05 };
            writeln!(f, "{score},{label},{}", if i % 2 == 0 { "a" } else { "b" }).unwrap();
        }
        let frame = Frame::from_csv_path(&path, 10_000).unwrap();
        (dir, frame)
    }

    #[test]
    fn test_psi_identical_is_zero() {
        let v: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert!(psi(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_psi_shifted_is_large() {
        let a: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..100).map(|i| i as f64 + 80.0).collect();
        assert!(psi(&a, &b) > 0.25);
    }

    #[test]
    fn test_stability_flags_drift() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "v").unwrap();
        for i in 0..50 {
            writeln!(f, "{}", i).unwrap();
        }
        for i in 0..50 {
            writeln!(f, "{}", i + 200).unwrap();
        }
        let frame = Frame::from_csv_path(&path, 10_000).unwrap();
        let out = stability_analysis(&frame, None);
        assert_eq!(out["features"]["v"]["status"], "shifted");
        assert_eq!(out["flagged"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_leakage_detects_target_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leak.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "feature,chargeback_flag,label").unwrap();
        for i in 0..50 {
            let label = i % 2;
            writeln!(f, "{},{},{}", i, label, label).unwrap();
        }
        let frame = Frame::from_csv_path(&path, 10_000).unwrap();
        let out = leakage_analysis(&frame, Some("label"));
        let suspects = out["suspects"].as_array().unwrap();
        assert!(suspects.iter().any(|s| s["kind"] == "target_correlation"));
        assert!(suspects.iter().any(|s| s["kind"] == "name_pattern"));
    }

    #[test]
    fn test_calibration_runs() {
        let (_d, frame) = scored_frame();
        let out = calibration_analysis(&frame, Some("label"));
        assert_eq!(out["score_column"], "score");
        assert!(out["expected_calibration_error"].as_f64().unwrap() >= 0.0);
        assert!(!out["bins"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fairness_groups() {
        let (_d, frame) = scored_frame();
        let out = fairness_analysis(&frame, Some("label"));
        let segment = &out["attributes"]["segment"];
        assert!(segment["disparate_impact_ratio"].as_f64().unwrap() > 0.0);
        assert_eq!(segment["groups"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_cost_threshold_finds_optimum() {
        let (_d, frame) = scored_frame();
        let out = cost_threshold_analysis(&frame, Some("label"));
        let optimal = out["optimal_threshold"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&optimal));
        assert_eq!(out["curve"].as_array().unwrap().len(), 21);
    }

    #[test]
    fn test_missing_target_messages() {
        let (_d, frame) = scored_frame();
        for out in [
            calibration_analysis(&frame, None),
            fairness_analysis(&frame, None),
            cost_threshold_analysis(&frame, None),
        ] {
            assert!(out["message"].is_string());
        }
    }
}
