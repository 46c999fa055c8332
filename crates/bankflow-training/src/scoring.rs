//! Scoring against persisted model artifacts.

use std::collections::HashMap;
use std::path::Path;

use bankflow::{Error, Result};
use bankflow_analysis::Frame;
use ndarray::Array2;
use serde::Serialize;
use serde_json::Value;

use crate::model::ModelArtifact;

/// One scoring result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringOutcome {
    pub prediction: String,
    pub probability: Option<f64>,
}

/// Score a single feature map against a model artifact. Missing features
/// are filled with zero, matching training-time imputation.
pub fn score_single(model_path: &Path, features: &HashMap<String, Value>) -> Result<ScoringOutcome> {
    let artifact = ModelArtifact::load(model_path)?;

    let mut x = Array2::<f64>::zeros((1, artifact.features.len()));
    for (i, name) in artifact.features.iter().enumerate() {
        x[[0, i]] = features.get(name).and_then(Value::as_f64).unwrap_or(0.0);
    }

    let predicted = artifact.model.predict(&x)[0];
    let probability = artifact.model.predict_proba(&x).map(|p| p[0]);
    Ok(ScoringOutcome {
        prediction: artifact
            .classes
            .get(predicted)
            .cloned()
            .unwrap_or_else(|| predicted.to_string()),
        probability,
    })
}

/// Score every row of a frame. Returns per-row predictions plus class
/// counts.
pub fn score_batch(model_path: &Path, frame: &Frame) -> Result<Value> {
    let artifact = ModelArtifact::load(model_path)?;

    let mut x = Array2::<f64>::zeros((frame.rows(), artifact.features.len()));
    for (i, name) in artifact.features.iter().enumerate() {
        let Some(column) = frame.column(name) else {
            continue;
        };
        let bankflow_analysis::Column::Numeric { values, .. } = column else {
            return Err(Error::data(format!(
                "Feature column '{name}' is not numeric in the scoring dataset"
            )));
        };
        for (row, value) in values.iter().enumerate() {
            x[[row, i]] = value.unwrap_or(0.0);
        }
    }

    let predictions = artifact.model.predict(&x);
    let probabilities = artifact.model.predict_proba(&x);

    let mut counts: HashMap<String, usize> = HashMap::new();
    let labels: Vec<String> = predictions
        .iter()
        .map(|p| {
            let label = artifact
                .classes
                .get(*p)
                .cloned()
                .unwrap_or_else(|| p.to_string());
            *counts.entry(label.clone()).or_insert(0) += 1;
            label
        })
        .collect();

    Ok(serde_json::json!({
        "rows_scored": frame.rows(),
        "predictions": labels,
        "probabilities": probabilities,
        "class_counts": counts,
        "model": artifact.algorithm.as_str(),
    }))
}
