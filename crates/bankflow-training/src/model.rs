//! Algorithms, the trained-model variant, and the persisted artifact.

use bankflow::{Error, Result};
use bankflow_analysis::Frame;
use linfa::prelude::*;
use linfa::Dataset;
use linfa_logistic::{
    FittedLogisticRegression, LogisticRegression, MultiFittedLogisticRegression,
    MultiLogisticRegression,
};
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const FOREST_TREES: usize = 25;
const FOREST_DEPTH: usize = 12;
const BOOST_ROUNDS: usize = 30;
const BOOST_DEPTH: usize = 3;

/// Supported training algorithms. Anything else is refused with
/// `Validation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    LogisticRegression,
    RandomForest,
    GradientBoosting,
}

impl Algorithm {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "logistic_regression" => Ok(Self::LogisticRegression),
            "random_forest" => Ok(Self::RandomForest),
            "gradient_boosting" => Ok(Self::GradientBoosting),
            other => Err(Error::validation(format!("Unknown algorithm: '{other}'"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogisticRegression => "logistic_regression",
            Self::RandomForest => "random_forest",
            Self::GradientBoosting => "gradient_boosting",
        }
    }
}

/// Render a numeric label the way the class list stores it.
pub fn fmt_label(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Feature matrix + class-encoded targets extracted from a frame.
pub struct TrainingData {
    pub features: Vec<String>,
    pub classes: Vec<String>,
    pub x: Array2<f64>,
    pub y: Array1<usize>,
}

impl TrainingData {
    /// Build training data: numeric columns (target excluded), missing
    /// values filled with zero, target values class-encoded.
    ///
    /// # Errors
    ///
    /// `Validation` when the target column is absent; `Data` when no
    /// numeric features remain or the target is empty.
    pub fn from_frame(frame: &Frame, target_column: &str) -> Result<Self> {
        let target = frame.column(target_column).ok_or_else(|| {
            Error::validation(format!("Target column '{target_column}' not in dataset"))
        })?;

        let raw_labels: Vec<String> = match target {
            bankflow_analysis::Column::Numeric { values, .. } => values
                .iter()
                .map(|v| v.map(fmt_label).unwrap_or_default())
                .collect(),
            bankflow_analysis::Column::Text { values, .. } => values
                .iter()
                .map(|v| v.clone().unwrap_or_default())
                .collect(),
        };

        let keep: Vec<bool> = raw_labels.iter().map(|l| !l.is_empty()).collect();
        let kept_rows = keep.iter().filter(|k| **k).count();
        if kept_rows == 0 {
            return Err(Error::data("Target column has no values"));
        }

        let mut classes: Vec<String> = Vec::new();
        let mut y = Vec::with_capacity(kept_rows);
        for (label, keep_row) in raw_labels.iter().zip(&keep) {
            if !keep_row {
                continue;
            }
            let idx = match classes.iter().position(|c| c == label) {
                Some(i) => i,
                None => {
                    classes.push(label.clone());
                    classes.len() - 1
                }
            };
            y.push(idx);
        }

        let feature_columns: Vec<(&str, &bankflow_analysis::Column)> = frame
            .columns()
            .iter()
            .filter_map(|c| match c {
                bankflow_analysis::Column::Numeric { name, .. } if name != target_column => {
                    Some((name.as_str(), c))
                }
                _ => None,
            })
            .collect();
        if feature_columns.is_empty() {
            return Err(Error::data("No numeric features found in dataset"));
        }

        let mut x = Array2::<f64>::zeros((kept_rows, feature_columns.len()));
        for (col_idx, (_, column)) in feature_columns.iter().enumerate() {
            let bankflow_analysis::Column::Numeric { values, .. } = column else {
                continue;
            };
            let mut row_out = 0;
            for (value, keep_row) in values.iter().zip(&keep) {
                if !keep_row {
                    continue;
                }
                x[[row_out, col_idx]] = value.unwrap_or(0.0);
                row_out += 1;
            }
        }

        Ok(Self {
            features: feature_columns.iter().map(|(n, _)| (*n).to_string()).collect(),
            classes,
            x,
            y: Array1::from_vec(y),
        })
    }

    /// Seeded shuffle split into (train, test).
    pub fn split(&self, test_size: f64, seed: u64) -> (TrainingData, TrainingData) {
        let n = self.x.nrows();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        // Fisher-Yates.
        for i in (1..n).rev() {
            let j = rng.gen_range(0..=i);
            indices.swap(i, j);
        }
        let n_test = ((n as f64) * test_size).round() as usize;
        let n_test = n_test.clamp(1, n.saturating_sub(1).max(1));
        let (test_idx, train_idx) = indices.split_at(n_test);

        (self.subset(train_idx), self.subset(test_idx))
    }

    pub(crate) fn subset(&self, indices: &[usize]) -> TrainingData {
        let x = self.x.select(Axis(0), indices);
        let y = Array1::from_vec(indices.iter().map(|i| self.y[*i]).collect());
        TrainingData {
            features: self.features.clone(),
            classes: self.classes.clone(),
            x,
            y,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

/// A fitted model, one variant per algorithm family.
#[derive(Serialize, Deserialize)]
pub enum TrainedModel {
    Logistic(FittedLogisticRegression<f64, usize>),
    MultiLogistic(MultiFittedLogisticRegression<f64, usize>),
    Forest(Vec<DecisionTree<f64, usize>>),
    Boosted {
        trees: Vec<(f64, DecisionTree<f64, usize>)>,
        n_classes: usize,
    },
}

impl TrainedModel {
    /// Fit with the requested algorithm.
    pub fn fit(algorithm: Algorithm, data: &TrainingData) -> Result<Self> {
        if data.n_classes() < 2 {
            return Err(Error::data(
                "Target column has a single class; nothing to learn",
            ));
        }
        match algorithm {
            Algorithm::LogisticRegression => fit_logistic(data),
            Algorithm::RandomForest => fit_forest(data),
            Algorithm::GradientBoosting => fit_boosted(data),
        }
    }

    /// Predicted class indices.
    pub fn predict(&self, x: &Array2<f64>) -> Array1<usize> {
        match self {
            Self::Logistic(model) => model.predict(x),
            Self::MultiLogistic(model) => model.predict(x),
            Self::Forest(trees) => vote(trees.iter().map(|t| (1.0, t)), x, usize::MAX),
            Self::Boosted { trees, n_classes } => {
                vote(trees.iter().map(|(w, t)| (*w, t)), x, *n_classes)
            }
        }
    }

    /// Positive-class probabilities, binary models only.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Option<Vec<f64>> {
        match self {
            Self::Logistic(model) => Some(model.predict_probabilities(x).to_vec()),
            Self::MultiLogistic(_) => None,
            Self::Forest(trees) => {
                let mut probs = vec![0.0; x.nrows()];
                for (_, tree) in trees.iter().map(|t| (1.0, t)) {
                    for (p, label) in probs.iter_mut().zip(tree.predict(x)) {
                        if label == 1 {
                            *p += 1.0;
                        }
                    }
                }
                Some(probs.into_iter().map(|p| p / trees.len() as f64).collect())
            }
            Self::Boosted { trees, .. } => {
                let total: f64 = trees.iter().map(|(w, _)| w).sum();
                if total <= f64::EPSILON {
                    return None;
                }
                let mut probs = vec![0.0; x.nrows()];
                for (weight, tree) in trees {
                    for (p, label) in probs.iter_mut().zip(tree.predict(x)) {
                        if label == 1 {
                            *p += weight;
                        }
                    }
                }
                Some(probs.into_iter().map(|p| p / total).collect())
            }
        }
    }

    /// Mean absolute coefficients for the linear models; `None` for the
    /// ensembles (they use permutation importance instead).
    pub fn coefficient_importance(&self) -> Option<Vec<f64>> {
        match self {
            Self::Logistic(model) => Some(model.params().iter().map(|c| c.abs()).collect()),
            Self::MultiLogistic(model) => {
                let params = model.params();
                Some(
                    (0..params.nrows())
                        .map(|i| params.row(i).iter().map(|c| c.abs()).sum::<f64>()
                            / params.ncols() as f64)
                        .collect(),
                )
            }
            _ => None,
        }
    }
}

fn fit_logistic(data: &TrainingData) -> Result<TrainedModel> {
    let dataset = Dataset::new(data.x.clone(), data.y.clone());
    if data.n_classes() == 2 {
        let model = LogisticRegression::default()
            .max_iterations(200)
            .fit(&dataset)
            .map_err(|e| Error::model(format!("Logistic regression failed to fit: {e}")))?;
        Ok(TrainedModel::Logistic(model))
    } else {
        let model = MultiLogisticRegression::default()
            .max_iterations(200)
            .fit(&dataset)
            .map_err(|e| Error::model(format!("Logistic regression failed to fit: {e}")))?;
        Ok(TrainedModel::MultiLogistic(model))
    }
}

fn fit_tree(data: &TrainingData, indices: &[usize], depth: usize) -> Result<DecisionTree<f64, usize>> {
    let sample = data.subset(indices);
    let dataset = Dataset::new(sample.x, sample.y);
    DecisionTree::params()
        .split_quality(SplitQuality::Gini)
        .max_depth(Some(depth))
        .fit(&dataset)
        .map_err(|e| Error::model(format!("Decision tree failed to fit: {e}")))
}

/// Bootstrap-bagged forest: each tree sees a with-replacement resample.
fn fit_forest(data: &TrainingData) -> Result<TrainedModel> {
    let n = data.x.nrows();
    let mut rng = StdRng::seed_from_u64(crate::RANDOM_STATE);
    let mut trees = Vec::with_capacity(FOREST_TREES);
    for _ in 0..FOREST_TREES {
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        trees.push(fit_tree(data, &indices, FOREST_DEPTH)?);
    }
    Ok(TrainedModel::Forest(trees))
}

/// Boosting by weighted resampling (SAMME-style): each round fits a
/// shallow tree on a weight-proportional resample, then reweights toward
/// the rows it got wrong.
fn fit_boosted(data: &TrainingData) -> Result<TrainedModel> {
    let n = data.x.nrows();
    let k = data.n_classes() as f64;
    let mut rng = StdRng::seed_from_u64(crate::RANDOM_STATE);
    let mut weights = vec![1.0 / n as f64; n];
    let mut trees = Vec::new();

    for _ in 0..BOOST_ROUNDS {
        let indices = weighted_sample(&weights, n, &mut rng);
        let tree = fit_tree(data, &indices, BOOST_DEPTH)?;

        let predictions = tree.predict(&data.x);
        let error: f64 = weights
            .iter()
            .zip(predictions.iter().zip(data.y.iter()))
            .filter(|(_, (p, y))| p != y)
            .map(|(w, _)| w)
            .sum();

        if error >= 1.0 - 1.0 / k {
            // Worse than chance; resampling again won't help this round.
            continue;
        }
        let error = error.max(1e-10);
        let alpha = ((1.0 - error) / error).ln() + (k - 1.0).ln();

        for (w, (p, y)) in weights.iter_mut().zip(predictions.iter().zip(data.y.iter())) {
            if p != y {
                *w *= alpha.exp();
            }
        }
        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
        trees.push((alpha, tree));
        if error < 1e-8 {
            break;
        }
    }

    if trees.is_empty() {
        return Err(Error::model("Boosting produced no usable rounds"));
    }
    Ok(TrainedModel::Boosted {
        trees,
        n_classes: data.n_classes(),
    })
}

fn weighted_sample(weights: &[f64], count: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut cumulative = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for w in weights {
        acc += w;
        cumulative.push(acc);
    }
    let total = acc.max(f64::MIN_POSITIVE);
    (0..count)
        .map(|_| {
            let draw: f64 = rng.gen_range(0.0..total);
            cumulative
                .iter()
                .position(|c| *c >= draw)
                .unwrap_or(weights.len() - 1)
        })
        .collect()
}

/// Weighted majority vote across trees. `n_classes` bounds the tally
/// array; `usize::MAX` means "derive from predictions".
fn vote<'a>(
    trees: impl Iterator<Item = (f64, &'a DecisionTree<f64, usize>)>,
    x: &Array2<f64>,
    n_classes: usize,
) -> Array1<usize> {
    let trees: Vec<(f64, &DecisionTree<f64, usize>)> = trees.collect();
    let mut predictions: Vec<Array1<usize>> = Vec::with_capacity(trees.len());
    for (_, tree) in &trees {
        predictions.push(tree.predict(x));
    }

    let max_class = if n_classes == usize::MAX {
        predictions
            .iter()
            .flat_map(|p| p.iter().copied())
            .max()
            .unwrap_or(0)
            + 1
    } else {
        n_classes
    };

    let mut out = Vec::with_capacity(x.nrows());
    for row in 0..x.nrows() {
        let mut tally = vec![0.0; max_class];
        for ((weight, _), preds) in trees.iter().zip(&predictions) {
            tally[preds[row]] += weight;
        }
        let winner = tally
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        out.push(winner);
    }
    Array1::from_vec(out)
}

/// Persisted model artifact: serde snapshot plus enough metadata to
/// score new rows.
#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    pub algorithm: Algorithm,
    pub features: Vec<String>,
    pub classes: Vec<String>,
    pub trained_at: String,
    pub model: TrainedModel,
}

impl ModelArtifact {
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::model(format!("Failed to read model {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::model(format!("Failed to parse model {}: {e}", path.display())))
    }
}
